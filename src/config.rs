//! Kernel Configuration
//!
//! Values fixed when the kernel is brought up.

use crate::env::MAX_ENVS;
use crate::mm::{Frame, VirtAddr};

/// Boot-time configuration of the syscall layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    env_capacity: usize,
    heap_base: VirtAddr,
    kernel_page: Option<Frame>,
}

/// Rejected configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The environment capacity is zero or not a power of two.
    CapacityNotPowerOfTwo,
    /// The environment capacity does not fit the id layout.
    CapacityTooLarge,
    /// The heap base is unaligned or not below the user ceiling.
    HeapBaseInvalid,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::CapacityNotPowerOfTwo => write!(f, "environment capacity must be a power of two"),
            Self::CapacityTooLarge => write!(f, "environment capacity exceeds {}", MAX_ENVS),
            Self::HeapBaseInvalid => write!(f, "heap base must be a page-aligned user address"),
        }
    }
}

impl KernelConfig {
    /// Default number of environment slots.
    pub const DEFAULT_ENV_CAPACITY: usize = 1024;

    /// Default initial heap break of a root environment.
    pub const DEFAULT_HEAP_BASE: VirtAddr = VirtAddr::new(0x1000_0000);

    /// Default configuration.
    pub const fn new() -> Self {
        Self {
            env_capacity: Self::DEFAULT_ENV_CAPACITY,
            heap_base: Self::DEFAULT_HEAP_BASE,
            kernel_page: None,
        }
    }

    /// Set the number of environment slots.
    pub const fn with_env_capacity(mut self, capacity: usize) -> Self {
        self.env_capacity = capacity;
        self
    }

    /// Set the initial heap break of root environments.
    pub const fn with_heap_base(mut self, base: VirtAddr) -> Self {
        self.heap_base = base;
        self
    }

    /// Set the page shared through map-kernel-page.
    pub const fn with_kernel_page(mut self, frame: Frame) -> Self {
        self.kernel_page = Some(frame);
        self
    }

    /// Number of environment slots.
    pub const fn env_capacity(&self) -> usize {
        self.env_capacity
    }

    /// Initial heap break.
    pub const fn heap_base(&self) -> VirtAddr {
        self.heap_base
    }

    /// Page shared through map-kernel-page, if any.
    pub const fn kernel_page(&self) -> Option<Frame> {
        self.kernel_page
    }

    /// Check the configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.env_capacity.is_power_of_two() {
            return Err(ConfigError::CapacityNotPowerOfTwo);
        }
        if self.env_capacity > MAX_ENVS {
            return Err(ConfigError::CapacityTooLarge);
        }
        if !self.heap_base.is_user_page() {
            return Err(ConfigError::HeapBaseInvalid);
        }
        Ok(())
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}
