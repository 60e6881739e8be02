//! IPC Rendezvous
//!
//! One scalar and optionally one page move from a sender to a receiver.
//! Whichever side arrives second completes the handshake:
//! - a send to a waiting receiver completes at once and the sender carries
//!   on
//! - a send to a receiver that is not waiting is parked on the sender's own
//!   record, and the sender blocks until the receiver picks it up
//!
//! # Security Considerations
//! - An offered page is validated (alignment, rights allow-list, source
//!   mapping, no widening) before any state changes
//! - A parked page is looked up again at receive time, so the receiver only
//!   ever aliases a frame the sender still maps
//! - Either party dying releases the other: see `Kernel::destroy_env`

use log::debug;

use super::state::{PendingPage, PendingSend};
use crate::cap::{check_narrowing, check_syscall_perm, Ownership};
use crate::console::Console;
use crate::env::{EnvId, EnvStatus};
use crate::kernel::Kernel;
use crate::mm::{MemoryManager, Perm, VirtAddr};
use crate::sched::Scheduler;
use crate::syscall::{Flow, SysResult, SyscallError};

impl<M: MemoryManager, S: Scheduler, C: Console> Kernel<M, S, C> {
    /// Send `value` to `envid`, offering the page at `srcva` if it is below
    /// `UTOP`.
    ///
    /// Returns 0 at once if the target is waiting. Otherwise the caller
    /// blocks until the target receives, and then sees 0.
    pub(crate) fn sys_ipc_try_send(&mut self, envid: EnvId, value: u32, srcva: VirtAddr, perm: u32) -> SysResult {
        let cur = self.cur_slot()?;
        let target = self.lookup_env(envid, Ownership::NotRequired)?;
        if target == cur {
            return Err(SyscallError::IpcNotRecv);
        }

        let page = if srcva.is_user() {
            if !srcva.is_aligned() {
                return Err(SyscallError::Inval);
            }
            let perm = check_syscall_perm(perm)?;
            let space = self.envs.get(cur).space().ok_or(SyscallError::BadEnv)?;
            let (frame, src_perm) = self.mem.lookup(space, srcva).ok_or(SyscallError::Inval)?;
            check_narrowing(perm, src_perm)?;
            Some(PendingPage { va: srcva, frame, perm })
        } else {
            None
        };

        let ipc = &self.envs.get(target).ipc;
        if ipc.receiving {
            let dest = ipc.dest;
            self.complete_transfer(cur, target, value, page, dest)?;
            return Ok(Flow::Return(0));
        }

        let to = self.envs.get(target).id();
        let env = self.envs.get_mut(cur);
        env.ipc.pending = Some(PendingSend { target: to, value, page });
        env.status = EnvStatus::NotRunnable;
        debug!("[{}] send to {} queued", env.id, to);
        Ok(Flow::Reschedule)
    }

    /// Receive a message, mapping an offered page at `dstva` if it is below
    /// `UTOP`.
    ///
    /// Completes at once if a sender is already parked on the caller;
    /// otherwise the caller blocks until a send arrives.
    pub(crate) fn sys_ipc_recv(&mut self, dstva: VirtAddr) -> SysResult {
        let cur = self.cur_slot()?;
        let dest = if dstva.is_user() {
            if !dstva.is_aligned() {
                return Err(SyscallError::Inval);
            }
            Some(dstva)
        } else {
            None
        };

        let me = self.envs.get(cur).id();
        let parked = self.envs.iter_live().find_map(|(slot, env)| {
            env.ipc.pending.filter(|p| p.target == me).map(|p| (slot, p))
        });

        if let Some((sender, send)) = parked {
            let page = send.page.filter(|p| self.still_mapped(sender, p));
            self.complete_transfer(sender, cur, send.value, page, dest)?;
            self.envs.get_mut(cur).ipc.dest = dest;

            let env = self.envs.get_mut(sender);
            env.ipc.pending = None;
            env.status = EnvStatus::Runnable;
            env.pending_result = Some(0);
            return Ok(Flow::Return(0));
        }

        let env = self.envs.get_mut(cur);
        env.ipc.dest = dest;
        env.ipc.receiving = true;
        env.status = EnvStatus::NotRunnable;
        debug!("[{}] waiting to receive", me);
        Ok(Flow::Reschedule)
    }

    /// Whether the sender in `slot` still maps the parked frame.
    fn still_mapped(&self, slot: usize, page: &PendingPage) -> bool {
        self.envs
            .get(slot)
            .space()
            .and_then(|space| self.mem.lookup(space, page.va))
            .is_some_and(|(frame, _)| frame == page.frame)
    }

    /// Hand the message to the receiver and make it runnable.
    ///
    /// The page is mapped at `dest` only if the receiver asked for one;
    /// otherwise it is dropped and the receiver's permission record is left
    /// empty. Nothing changes if the mapping fails.
    fn complete_transfer(
        &mut self,
        sender: usize,
        receiver: usize,
        value: u32,
        page: Option<PendingPage>,
        dest: Option<VirtAddr>,
    ) -> Result<(), SyscallError> {
        let from = self.envs.get(sender).id();
        let to = self.envs.get(receiver);

        let mut perm = Perm::empty();
        if let (Some(page), Some(dest)) = (page, dest) {
            let space = to.space().ok_or(SyscallError::BadEnv)?;
            self.mem.insert(space, page.frame, dest, page.perm)?;
            perm = page.perm;
        }

        let to = self.envs.get_mut(receiver);
        to.ipc.deliver(from, value, perm);
        to.status = EnvStatus::Runnable;
        to.pending_result = Some(0);
        debug!("[{}] ipc {} -> {} perm {:?}", from, value, to.id, perm);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Resumption;
    use crate::mm::UTOP;
    use crate::syscall::numbers::*;
    use crate::testing::{boot, read_user, ret, write_user, TestKernel, ENTRY};

    const X: u32 = 0x0080_0000;
    const Y: u32 = 0x00C0_0000;
    const RW: u32 = Perm::USER_RW.bits();
    const NO_PAGE: u32 = UTOP as u32;

    /// Kernel with root environments A (current) and B.
    fn pair() -> (TestKernel, EnvId, EnvId) {
        let (mut k, a) = boot(64);
        let b = k.create_env(EnvId::NONE, ENTRY, 0).unwrap();
        (k, a, b)
    }

    fn send(k: &mut TestKernel, to: EnvId, value: u32, va: u32, perm: u32) -> Option<Resumption> {
        k.syscall(SYS_IPC_TRY_SEND, [to.raw(), value, va, perm, 0])
    }

    fn recv(k: &mut TestKernel, va: u32) -> Option<Resumption> {
        k.syscall(SYS_IPC_RECV, [va, 0, 0, 0, 0])
    }

    fn alloc_and_fill(k: &mut TestKernel, env: EnvId, bytes: &[u8]) {
        let r = k.syscall(SYS_PAGE_ALLOC, [0, X, RW, 0, 0]);
        assert_eq!(ret(r), 0);
        write_user(k, env, X as usize, bytes);
    }

    /// What the receiver observed: sender, value, permissions and the
    /// first bytes at `Y` if anything is mapped there.
    fn observed(k: &TestKernel, b: EnvId) -> (EnvId, u32, Perm, Option<Vec<u8>>) {
        let env = k.env(b).unwrap();
        let ipc = env.ipc();
        let space = env.space().unwrap();
        let bytes = k
            .memory()
            .lookup(space, VirtAddr::new(Y as usize))
            .map(|_| read_user(k, b, Y as usize, 5));
        (ipc.from, ipc.value, ipc.perm, bytes)
    }

    #[test]
    fn test_send_to_waiting_receiver() {
        let (mut k, a, b) = pair();
        k.run(b).unwrap();
        let r = recv(&mut k, Y).unwrap();
        assert_eq!(r.env, a);
        assert_eq!(k.env(b).unwrap().status(), EnvStatus::NotRunnable);
        assert!(k.env(b).unwrap().ipc().receiving);

        alloc_and_fill(&mut k, a, b"hello");
        let r = send(&mut k, b, 7, X, RW).unwrap();
        assert_eq!(r.env, a);
        assert_eq!(r.frame.return_value(), 0);

        let env = k.env(b).unwrap();
        assert_eq!(env.status(), EnvStatus::Runnable);
        assert_eq!(env.pending_result(), Some(0));
        assert!(!env.ipc().receiving);
        assert_eq!(observed(&k, b), (a, 7, Perm::USER_RW, Some(b"hello".to_vec())));
    }

    #[test]
    fn test_queued_send_completes_on_receive() {
        let (mut k, a, b) = pair();
        alloc_and_fill(&mut k, a, b"forty");

        // B is not receiving yet: A blocks and B runs.
        let r = send(&mut k, b, 42, X, RW).unwrap();
        assert_eq!(r.env, b);
        let env = k.env(a).unwrap();
        assert_eq!(env.status(), EnvStatus::NotRunnable);
        assert_eq!(env.ipc().pending.map(|p| p.target), Some(b));

        let r = recv(&mut k, Y).unwrap();
        assert_eq!(r.env, b);
        assert_eq!(r.frame.return_value(), 0);
        assert_eq!(observed(&k, b), (a, 42, Perm::USER_RW, Some(b"forty".to_vec())));

        let env = k.env(a).unwrap();
        assert_eq!(env.status(), EnvStatus::Runnable);
        assert_eq!(env.pending_result(), Some(0));
        assert!(env.ipc().pending.is_none());

        // The page is shared, not copied.
        write_user(&mut k, b, Y as usize, b"FORTY");
        assert_eq!(read_user(&k, a, X as usize, 5), b"FORTY");
    }

    #[test]
    fn test_both_orders_agree() {
        let (mut k1, a1, b1) = pair();
        k1.run(b1).unwrap();
        recv(&mut k1, Y);
        alloc_and_fill(&mut k1, a1, b"order");
        send(&mut k1, b1, 9, X, RW);

        let (mut k2, a2, b2) = pair();
        alloc_and_fill(&mut k2, a2, b"order");
        send(&mut k2, b2, 9, X, RW);
        recv(&mut k2, Y);

        assert_eq!(a1, a2);
        assert_eq!(observed(&k1, b1), observed(&k2, b2));
    }

    #[test]
    fn test_page_dropped_without_destination() {
        let (mut k, a, b) = pair();
        k.run(b).unwrap();
        recv(&mut k, NO_PAGE);
        alloc_and_fill(&mut k, a, b"drop!");
        assert_eq!(ret(send(&mut k, b, 5, X, RW)), 0);

        assert_eq!(observed(&k, b), (a, 5, Perm::empty(), None));
        let space = k.env(a).unwrap().space().unwrap();
        let frame = k.memory().lookup(space, VirtAddr::new(X as usize)).unwrap().0;
        assert_eq!(k.memory().ref_count(frame), 1);
    }

    #[test]
    fn test_value_only_send() {
        let (mut k, a, b) = pair();
        k.run(b).unwrap();
        recv(&mut k, Y);
        assert_eq!(ret(send(&mut k, b, 0xdead, NO_PAGE, 0)), 0);
        assert_eq!(observed(&k, b), (a, 0xdead, Perm::empty(), None));
    }

    #[test]
    fn test_send_to_self_and_unknown() {
        let (mut k, a, _) = pair();
        assert_eq!(ret(send(&mut k, a, 1, NO_PAGE, 0)), SyscallError::IpcNotRecv.code());
        assert_eq!(ret(send(&mut k, EnvId::NONE, 1, NO_PAGE, 0)), SyscallError::IpcNotRecv.code());
        let bogus = EnvId::from_raw(0x0000_3007);
        assert_eq!(ret(send(&mut k, bogus, 1, NO_PAGE, 0)), SyscallError::BadEnv.code());
    }

    #[test]
    fn test_bad_page_offer_changes_nothing() {
        let (mut k, a, b) = pair();
        k.run(b).unwrap();
        recv(&mut k, Y);
        let inval = SyscallError::Inval.code();

        // Unmapped, misaligned, then a writable alias of a read-only page.
        assert_eq!(ret(send(&mut k, b, 1, X, RW)), inval);
        assert_eq!(ret(send(&mut k, b, 1, X + 8, RW)), inval);
        let ro = Perm::USER_PRESENT.bits();
        assert_eq!(ret(k.syscall(SYS_PAGE_ALLOC, [0, X, ro, 0, 0])), 0);
        assert_eq!(ret(send(&mut k, b, 1, X, RW)), inval);
        assert_eq!(ret(send(&mut k, b, 1, X, 0x1)), inval);

        let env = k.env(b).unwrap();
        assert!(env.ipc().receiving);
        assert_eq!(env.status(), EnvStatus::NotRunnable);
        assert!(k.env(a).unwrap().ipc().pending.is_none());
    }

    #[test]
    fn test_recv_misaligned_destination() {
        let (mut k, a, _) = pair();
        assert_eq!(ret(recv(&mut k, Y + 1)), SyscallError::Inval.code());
        assert_eq!(k.env(a).unwrap().status(), EnvStatus::Runnable);
    }

    #[test]
    fn test_recv_out_of_memory_leaves_state_untouched() {
        // Two directories, A's page table and A's page use every frame.
        let (mut k, a) = boot(4);
        let b = k.create_env(EnvId::NONE, ENTRY, 0).unwrap();
        alloc_and_fill(&mut k, a, b"nomem");
        assert_eq!(send(&mut k, b, 8, X, RW).unwrap().env, b);

        let r = recv(&mut k, Y).unwrap();
        assert_eq!(r.env, b);
        assert_eq!(r.frame.return_value(), SyscallError::NoMem.code());

        let env = k.env(b).unwrap();
        assert_eq!(env.ipc().dest, None);
        assert!(!env.ipc().receiving);
        assert_eq!(env.ipc().from, EnvId::NONE);
        let sender = k.env(a).unwrap();
        assert_eq!(sender.status(), EnvStatus::NotRunnable);
        assert_eq!(sender.ipc().pending.map(|p| p.value), Some(8));
    }

    #[test]
    fn test_receiver_death_wakes_sender() {
        let (mut k, a, b) = pair();
        let r = send(&mut k, b, 1, NO_PAGE, 0).unwrap();
        assert_eq!(r.env, b);

        let r = k.syscall(SYS_ENV_DESTROY, [0; 5]).unwrap();
        assert_eq!(r.env, a);
        assert_eq!(r.frame.return_value(), SyscallError::BadEnv.code());
        assert!(k.env(a).unwrap().ipc().pending.is_none());
    }

    #[test]
    fn test_dead_sender_is_not_matched() {
        let (mut k, b) = boot(64);
        let a = k.create_env(b, ENTRY, 0).unwrap();
        k.run(a).unwrap();
        let r = send(&mut k, b, 3, NO_PAGE, 0).unwrap();
        assert_eq!(r.env, b);

        // B owns A and destroys it before receiving.
        assert_eq!(ret(k.syscall(SYS_ENV_DESTROY, [a.raw(), 0, 0, 0, 0])), 0);
        assert!(recv(&mut k, Y).is_none());
        let env = k.env(b).unwrap();
        assert!(env.ipc().receiving);
        assert_eq!(env.status(), EnvStatus::NotRunnable);
    }

    #[test]
    fn test_parked_page_reresolved_at_receive() {
        let (mut k, b) = boot(64);
        let a = k.create_env(b, ENTRY, 0).unwrap();
        k.run(a).unwrap();
        alloc_and_fill(&mut k, a, b"stale");
        let r = send(&mut k, b, 11, X, RW).unwrap();
        assert_eq!(r.env, b);

        // The parent unmaps the offered page while the send is parked.
        assert_eq!(ret(k.syscall(SYS_PAGE_UNMAP, [a.raw(), X, 0, 0, 0])), 0);
        assert_eq!(ret(recv(&mut k, Y)), 0);
        assert_eq!(observed(&k, b), (a, 11, Perm::empty(), None));
        assert_eq!(k.env(a).unwrap().status(), EnvStatus::Runnable);
    }
}
