//! Saved Register State
//!
//! The snapshot captured on every kernel entry and restored on every resume.
//!
//! # Security Considerations
//! - A snapshot supplied by user space is sanitized before it can ever be
//!   restored: segment selectors are pinned to ring 3, interrupts are
//!   forced on, and I/O privilege is dropped

/// Kernel code segment selector.
pub const GD_KT: u16 = 0x08;
/// Kernel data segment selector.
pub const GD_KD: u16 = 0x10;
/// User code segment selector.
pub const GD_UT: u16 = 0x18;
/// User data segment selector.
pub const GD_UD: u16 = 0x20;
/// Requested privilege level for user mode.
pub const RPL_USER: u16 = 3;

/// Interrupt enable flag.
pub const FL_IF: u32 = 0x0000_0200;
/// I/O privilege level bits.
pub const FL_IOPL_MASK: u32 = 0x0000_3000;

/// General purpose registers, in `pusha` order.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushRegs {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    /// Ignored on restore.
    pub oesp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    /// Syscall number on entry, return value on exit.
    pub eax: u32,
}

/// Register snapshot of a suspended environment.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Trapframe {
    pub regs: PushRegs,
    pub es: u16,
    pub ds: u16,
    pub trapno: u32,
    pub err: u32,
    pub eip: u32,
    pub cs: u16,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u16,
}

impl Trapframe {
    /// Size of the snapshot in user memory, matching the hardware frame
    /// layout (16-bit selectors are padded to 32 bits).
    pub const SIZE: usize = 68;

    /// A fresh user-mode snapshot: ring-3 selectors, interrupts enabled.
    pub fn new_user(entry: u32, stack_top: u32) -> Self {
        let mut tf = Self {
            eip: entry,
            esp: stack_top,
            ..Self::default()
        };
        tf.sanitize_for_user();
        tf
    }

    /// Force every protection-relevant field to user-mode values.
    pub fn sanitize_for_user(&mut self) {
        self.ds = GD_UD | RPL_USER;
        self.es = GD_UD | RPL_USER;
        self.ss = GD_UD | RPL_USER;
        self.cs = GD_UT | RPL_USER;
        self.eflags |= FL_IF;
        self.eflags &= !FL_IOPL_MASK;
    }

    /// Load the return register, making the suspended call return `value`.
    #[inline]
    pub fn set_return(&mut self, value: i32) {
        self.regs.eax = value as u32;
    }

    /// Current contents of the return register.
    #[inline]
    pub fn return_value(&self) -> i32 {
        self.regs.eax as i32
    }

    /// Decode a snapshot from its in-memory layout.
    pub fn from_bytes(raw: &[u8; Self::SIZE]) -> Self {
        let word = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
        let half = |i: usize| word(i) as u16;
        Self {
            regs: PushRegs {
                edi: word(0),
                esi: word(4),
                ebp: word(8),
                oesp: word(12),
                ebx: word(16),
                edx: word(20),
                ecx: word(24),
                eax: word(28),
            },
            es: half(32),
            ds: half(36),
            trapno: word(40),
            err: word(44),
            eip: word(48),
            cs: half(52),
            eflags: word(56),
            esp: word(60),
            ss: half(64),
        }
    }

    /// Encode the snapshot in its in-memory layout.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let words = [
            self.regs.edi,
            self.regs.esi,
            self.regs.ebp,
            self.regs.oesp,
            self.regs.ebx,
            self.regs.edx,
            self.regs.ecx,
            self.regs.eax,
            self.es as u32,
            self.ds as u32,
            self.trapno,
            self.err,
            self.eip,
            self.cs as u32,
            self.eflags,
            self.esp,
            self.ss as u32,
        ];
        let mut out = [0u8; Self::SIZE];
        for (chunk, w) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&w.to_le_bytes());
        }
        out
    }
}
