//! Test fixtures: a kernel over host memory with a running root
//! environment.

use alloc::vec;
use alloc::vec::Vec;

use crate::config::KernelConfig;
use crate::console::BufferConsole;
use crate::env::EnvId;
use crate::kernel::{Kernel, Resumption};
use crate::mm::{HostMemory, MemoryManager, VirtAddr};
use crate::sched::RoundRobin;

pub(crate) type TestKernel = Kernel<HostMemory, RoundRobin, BufferConsole>;

/// Entry point of environments created by the fixtures.
pub(crate) const ENTRY: u32 = 0x0080_0020;
/// Initial user stack top.
pub(crate) const STACK_TOP: u32 = 0xEEBF_E000;

/// Kernel with `frames` physical pages and no environments.
pub(crate) fn kernel_with(config: KernelConfig, frames: usize) -> TestKernel {
    Kernel::new(config, HostMemory::new(frames), RoundRobin, BufferConsole::new()).unwrap()
}

/// Kernel with one root environment, already current.
pub(crate) fn boot(frames: usize) -> (TestKernel, EnvId) {
    let mut k = kernel_with(KernelConfig::new(), frames);
    let root = k.create_env(EnvId::NONE, ENTRY, STACK_TOP).unwrap();
    k.run(root).unwrap();
    (k, root)
}

/// Return value seen by whoever resumes next.
pub(crate) fn ret(r: Option<Resumption>) -> i32 {
    r.expect("nothing runnable").frame.return_value()
}

/// Write into the address space of `env`.
pub(crate) fn write_user(k: &mut TestKernel, env: EnvId, va: usize, bytes: &[u8]) {
    let slot = k.envs.resolve(env).unwrap();
    let space = k.envs.get(slot).space().unwrap();
    k.mem.write_bytes(space, VirtAddr::new(va), bytes).unwrap();
}

/// Read from the address space of `env`.
pub(crate) fn read_user(k: &TestKernel, env: EnvId, va: usize, len: usize) -> Vec<u8> {
    let space = k.env(env).unwrap().space().unwrap();
    let mut buf = vec![0u8; len];
    k.mem.read_bytes(space, VirtAddr::new(va), &mut buf).unwrap();
    buf
}
