//! Fault-injecting wrapper around a [`Database`].
//!
//! Faults come in two flavors:
//! - Random put/get errors at a configured rate
//! - A hard cutoff after which every put fails, for exercising partially
//!   written commits

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::{Database, DatabaseError};

/// Configuration for fault injection.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FaultConfig {
    /// Probability of a put error (0.0 - 1.0).
    pub put_error_rate: f64,
    /// Probability of a get error (0.0 - 1.0).
    pub get_error_rate: f64,
    /// Number of puts that succeed before every later put fails.
    pub fail_puts_after: Option<usize>,
}

impl FaultConfig {
    /// Create a fault config with no faults (for baseline testing).
    #[must_use]
    pub const fn none() -> Self {
        Self {
            put_error_rate: 0.0,
            get_error_rate: 0.0,
            fail_puts_after: None,
        }
    }

    /// Create a fault config with low fault rates (for stress testing).
    #[must_use]
    pub const fn low_faults() -> Self {
        Self {
            put_error_rate: 0.001,
            get_error_rate: 0.001,
            fail_puts_after: None,
        }
    }

    /// Create a fault config with high fault rates (for extreme testing).
    #[must_use]
    pub const fn high_faults() -> Self {
        Self {
            put_error_rate: 0.05,
            get_error_rate: 0.05,
            fail_puts_after: None,
        }
    }
}

/// A [`Database`] that fails on purpose.
///
/// The same seed and the same sequence of calls produce the same faults.
/// Put and get attempts are counted whether or not they fail.
#[derive(Debug)]
pub struct FaultyDatabase<D> {
    inner: D,
    config: Mutex<FaultConfig>,
    rng: Mutex<StdRng>,
    puts: AtomicUsize,
    gets: AtomicUsize,
}

impl<D: Database> FaultyDatabase<D> {
    /// Wrap `inner`, drawing faults from an RNG seeded with `seed`.
    #[must_use]
    pub fn new(inner: D, config: FaultConfig, seed: u64) -> Self {
        Self {
            inner,
            config: Mutex::new(config),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            puts: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
        }
    }

    /// The wrapped store.
    #[must_use]
    pub const fn inner(&self) -> &D {
        &self.inner
    }

    /// Number of put attempts so far.
    #[must_use]
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::Relaxed)
    }

    /// Number of get attempts so far.
    #[must_use]
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::Relaxed)
    }

    /// Replace the fault configuration. Counters keep running.
    #[allow(clippy::expect_used)] // Lock poisoning indicates unrecoverable state
    pub fn set_faults(&self, config: FaultConfig) {
        *self.config.lock().expect("lock poisoned") = config;
    }

    fn faults(&self) -> Result<FaultConfig, DatabaseError> {
        self.config
            .lock()
            .map(|config| *config)
            .map_err(|_| DatabaseError::LockPoisoned)
    }

    /// Check if a fault should be injected based on the given rate.
    fn should_inject_fault(&self, rate: f64) -> Result<bool, DatabaseError> {
        if rate <= 0.0 {
            return Ok(false);
        }
        let mut rng = self.rng.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        Ok(rng.random::<f64>() < rate)
    }
}

impl<D: Database> Database for FaultyDatabase<D> {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DatabaseError> {
        let attempt = self.puts.fetch_add(1, Ordering::Relaxed);
        let config = self.faults()?;

        if let Some(limit) = config.fail_puts_after
            && attempt >= limit
        {
            return Err(DatabaseError::InjectedFault(format!(
                "put #{attempt} past the limit of {limit} puts"
            )));
        }
        if self.should_inject_fault(config.put_error_rate)? {
            return Err(DatabaseError::InjectedFault(format!(
                "random put error on put #{attempt}"
            )));
        }
        self.inner.put(key, value)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
        let attempt = self.gets.fetch_add(1, Ordering::Relaxed);
        let config = self.faults()?;

        if self.should_inject_fault(config.get_error_rate)? {
            return Err(DatabaseError::InjectedFault(format!(
                "random get error on get #{attempt}"
            )));
        }
        self.inner.get(key)
    }
}
