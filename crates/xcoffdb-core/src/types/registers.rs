//! Logical register numbering and the register cache seam.
//!
//! Registers are addressed by a logical index laid out in three contiguous
//! ranges:
//!
//! ```text
//!  0..=31   general-purpose  r0-r31   (4 bytes each)
//! 32..=63   floating-point   f0-f31   (8 bytes each)
//! 64..=70   special          pc msr cr lr ctr xer mq (4 bytes each)
//! 71..      variant registers, accepted on store and otherwise ignored
//! ```
//!
//! The cache itself is a collaborator: the engine only needs to read and
//! supply raw target-order bytes per logical index and to mark slots valid.

/// Number of general-purpose registers.
pub const GPR_COUNT: usize = 32;

/// Number of floating-point registers.
pub const FPR_COUNT: usize = 32;

/// Logical index of the first floating-point register.
pub const FP0_REGNUM: usize = GPR_COUNT;

/// Logical index of the first special register (the program counter).
pub const FIRST_SPECIAL_REGNUM: usize = FP0_REGNUM + FPR_COUNT;

/// Logical index of the last special register (MQ).
pub const LAST_SPECIAL_REGNUM: usize = FIRST_SPECIAL_REGNUM + SpecialRegister::ALL.len() - 1;

/// Logical index of the stack pointer, r1.
pub const SP_REGNUM: usize = 1;

/// Size in bytes of a general-purpose or special register.
pub const WORD_SIZE: usize = 4;

/// Size in bytes of a floating-point register.
pub const DOUBLE_SIZE: usize = 8;

/// Machine identifier of the first floating-point register (`FPR0`).
pub const MACHINE_FPR0: u32 = 256;

/// Special-purpose registers, in logical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialRegister
{
    /// Instruction address register (program counter)
    Iar,
    /// Machine state register
    Msr,
    /// Condition register
    Cr,
    /// Link register
    Lr,
    /// Count register
    Ctr,
    /// Fixed-point exception register (overflow, carry)
    Xer,
    /// Multiply-quotient register
    Mq,
}

impl SpecialRegister
{
    /// Every special register in logical (and core-section) order.
    pub const ALL: [SpecialRegister; 7] = [
        SpecialRegister::Iar,
        SpecialRegister::Msr,
        SpecialRegister::Cr,
        SpecialRegister::Lr,
        SpecialRegister::Ctr,
        SpecialRegister::Xer,
        SpecialRegister::Mq,
    ];

    /// Machine register identifier used by the process-control interface.
    pub const fn machine_id(self) -> u32
    {
        match self {
            SpecialRegister::Iar => 128,
            SpecialRegister::Msr => 129,
            SpecialRegister::Cr => 130,
            SpecialRegister::Lr => 131,
            SpecialRegister::Ctr => 132,
            SpecialRegister::Xer => 133,
            SpecialRegister::Mq => 134,
        }
    }

    /// Logical register index of this special register.
    pub const fn regnum(self) -> usize
    {
        FIRST_SPECIAL_REGNUM + self as usize
    }

    pub const fn name(self) -> &'static str
    {
        match self {
            SpecialRegister::Iar => "pc",
            SpecialRegister::Msr => "msr",
            SpecialRegister::Cr => "cr",
            SpecialRegister::Lr => "lr",
            SpecialRegister::Ctr => "ctr",
            SpecialRegister::Xer => "xer",
            SpecialRegister::Mq => "mq",
        }
    }
}

/// A logical register index, classified by range.
///
/// ## Example
///
/// ```rust
/// use xcoffdb_core::types::{RegisterIndex, SpecialRegister};
///
/// assert_eq!(RegisterIndex::classify(3, 71), RegisterIndex::General(3));
/// assert_eq!(RegisterIndex::classify(33, 71), RegisterIndex::Float(1));
/// assert_eq!(RegisterIndex::classify(67, 71), RegisterIndex::Special(SpecialRegister::Lr));
/// assert_eq!(RegisterIndex::classify(75, 80), RegisterIndex::Variant(75));
/// assert_eq!(RegisterIndex::classify(90, 80), RegisterIndex::Unknown(90));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterIndex
{
    /// General-purpose register r0-r31
    General(u8),
    /// Floating-point register f0-f31
    Float(u8),
    /// One of the special registers
    Special(SpecialRegister),
    /// Past the special range but within the configured register count
    Variant(usize),
    /// Not a register of this target
    Unknown(usize),
}

impl RegisterIndex
{
    /// Classify a logical index; `register_count` bounds the variant range.
    #[allow(clippy::cast_possible_truncation)]
    pub fn classify(regnum: usize, register_count: usize) -> Self
    {
        match regnum {
            n if n < FP0_REGNUM => RegisterIndex::General(n as u8),
            n if n < FIRST_SPECIAL_REGNUM => RegisterIndex::Float((n - FP0_REGNUM) as u8),
            n if n <= LAST_SPECIAL_REGNUM => RegisterIndex::Special(SpecialRegister::ALL[n - FIRST_SPECIAL_REGNUM]),
            n if n < register_count => RegisterIndex::Variant(n),
            n => RegisterIndex::Unknown(n),
        }
    }

    /// Logical index this classification was made from.
    pub const fn regnum(self) -> usize
    {
        match self {
            RegisterIndex::General(n) => n as usize,
            RegisterIndex::Float(n) => FP0_REGNUM + n as usize,
            RegisterIndex::Special(reg) => reg.regnum(),
            RegisterIndex::Variant(n) | RegisterIndex::Unknown(n) => n,
        }
    }
}

/// Which registers a fetch or store covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterSelection
{
    All,
    One(usize),
}

/// Raw size of the register at `regnum`.
pub const fn register_size(regnum: usize) -> usize
{
    if regnum >= FP0_REGNUM && regnum < FIRST_SPECIAL_REGNUM {
        DOUBLE_SIZE
    } else {
        WORD_SIZE
    }
}

/// Storage for register contents, addressed by logical index.
///
/// Contents are raw bytes in target (big-endian) order. `raw` returns a slice
/// exactly [`register_size`] bytes long.
pub trait RegisterCache
{
    fn raw(&self, regnum: usize) -> &[u8];

    fn supply(&mut self, regnum: usize, bytes: &[u8]);

    fn mark_valid(&mut self, regnum: usize);

    fn mark_all_valid(&mut self);
}

/// Flat register cache used by sessions and tests.
///
/// ## Example
///
/// ```rust
/// use xcoffdb_core::types::{RegisterBuffer, RegisterCache};
///
/// let mut regs = RegisterBuffer::new(71);
/// regs.set_word(1, 0x2ff2_2b40);
/// assert_eq!(regs.word(1), 0x2ff2_2b40);
/// assert_eq!(regs.raw(1), &[0x2f, 0xf2, 0x2b, 0x40]);
/// assert!(!regs.is_valid(1));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBuffer
{
    bytes: Vec<u8>,
    offsets: Vec<usize>,
    valid: Vec<bool>,
}

impl RegisterBuffer
{
    /// Create a zeroed cache with room for `register_count` registers.
    pub fn new(register_count: usize) -> Self
    {
        let mut offsets = Vec::with_capacity(register_count + 1);
        let mut end = 0;
        for regnum in 0..register_count {
            offsets.push(end);
            end += register_size(regnum);
        }
        offsets.push(end);

        Self {
            bytes: vec![0; end],
            offsets,
            valid: vec![false; register_count],
        }
    }

    pub fn register_count(&self) -> usize
    {
        self.valid.len()
    }

    /// Whether the slot of `regnum` holds a fetched value.
    pub fn is_valid(&self, regnum: usize) -> bool
    {
        self.valid.get(regnum).copied().unwrap_or(false)
    }

    /// Big-endian value of a 4-byte register.
    pub fn word(&self, regnum: usize) -> u32
    {
        let mut word = [0u8; WORD_SIZE];
        word.copy_from_slice(&self.raw(regnum)[..WORD_SIZE]);
        u32::from_be_bytes(word)
    }

    /// Store a 32-bit value into the slot of `regnum`, big-endian.
    pub fn set_word(&mut self, regnum: usize, value: u32)
    {
        self.supply(regnum, &value.to_be_bytes());
    }

    /// Floating-point register contents as an `f64`.
    pub fn double(&self, regnum: usize) -> f64
    {
        let mut raw = [0u8; DOUBLE_SIZE];
        raw.copy_from_slice(&self.raw(regnum)[..DOUBLE_SIZE]);
        f64::from_be_bytes(raw)
    }

    fn slot(&self, regnum: usize) -> std::ops::Range<usize>
    {
        self.offsets[regnum]..self.offsets[regnum + 1]
    }
}

impl RegisterCache for RegisterBuffer
{
    fn raw(&self, regnum: usize) -> &[u8]
    {
        &self.bytes[self.slot(regnum)]
    }

    fn supply(&mut self, regnum: usize, bytes: &[u8])
    {
        let slot = self.slot(regnum);
        let len = bytes.len().min(slot.len());
        self.bytes[slot.start..slot.start + len].copy_from_slice(&bytes[..len]);
    }

    fn mark_valid(&mut self, regnum: usize)
    {
        if let Some(flag) = self.valid.get_mut(regnum) {
            *flag = true;
        }
    }

    fn mark_all_valid(&mut self)
    {
        self.valid.iter_mut().for_each(|flag| *flag = true);
    }
}
