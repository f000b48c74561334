use crate::{SubstrateError, SubstrateResult};

use super::signature::NativeType;

/// Largest number of integer argument registers any supported target passes.
pub const MAX_INTEGER_REGISTERS: usize = 8;
/// Largest number of floating-point argument registers any supported target passes.
pub const MAX_FLOAT_REGISTERS: usize = 8;

/// Argument registers a calling convention provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterBudget {
    pub integer: usize,
    pub float: usize,
}

impl RegisterBudget {
    pub const fn new(integer: usize, float: usize) -> Self {
        Self { integer, float }
    }
}

/// How the callee hands its result back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnClass {
    #[default]
    Void,
    Integer,
    Float32,
    Float64,
}

impl ReturnClass {
    pub fn of(ty: NativeType) -> Self {
        match ty {
            NativeType::Void => ReturnClass::Void,
            NativeType::Float32 => ReturnClass::Float32,
            NativeType::Float64 => ReturnClass::Float64,
            NativeType::Int8
            | NativeType::Int16
            | NativeType::Int32
            | NativeType::Int64
            | NativeType::Uint8
            | NativeType::Uint16
            | NativeType::Uint32
            | NativeType::Uint64
            | NativeType::Pointer => ReturnClass::Integer,
        }
    }
}

/// Raw result as it left the callee's return register.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawReturn {
    Void,
    Integer(u64),
    Float32(f32),
    Float64(f64),
}

/// Marshalled arguments for one native call.
///
/// Integer-class words and float-class values are kept in separate banks because both targets
/// assign the two register files independently. Unused slots stay zero. `f32` arguments are
/// stored as the low 32 bits of an `f64` slot, which is where the callee reads a single.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawFrame {
    integers: [u64; MAX_INTEGER_REGISTERS],
    integer_count: usize,
    floats: [f64; MAX_FLOAT_REGISTERS],
    float_count: usize,
    ret: ReturnClass,
}

impl RawFrame {
    pub fn new(ret: ReturnClass) -> Self {
        Self {
            ret,
            ..Self::default()
        }
    }

    pub fn push_integer(&mut self, word: u64) -> SubstrateResult<()> {
        let slot = self.integers.get_mut(self.integer_count).ok_or_else(|| {
            SubstrateError::Signature("too many integer arguments for this target".into())
        })?;
        *slot = word;
        self.integer_count += 1;
        Ok(())
    }

    pub fn push_float64(&mut self, value: f64) -> SubstrateResult<()> {
        let slot = self.floats.get_mut(self.float_count).ok_or_else(|| {
            SubstrateError::Signature("too many floating-point arguments for this target".into())
        })?;
        *slot = value;
        self.float_count += 1;
        Ok(())
    }

    pub fn push_float32(&mut self, value: f32) -> SubstrateResult<()> {
        self.push_float64(f64::from_bits(u64::from(value.to_bits())))
    }

    /// Every integer register, used or not.
    pub fn integer_registers(&self) -> &[u64; MAX_INTEGER_REGISTERS] {
        &self.integers
    }

    /// Every float register, used or not.
    pub fn float_registers(&self) -> &[f64; MAX_FLOAT_REGISTERS] {
        &self.floats
    }

    pub fn integers(&self) -> &[u64] {
        &self.integers[..self.integer_count]
    }

    pub fn floats(&self) -> &[f64] {
        &self.floats[..self.float_count]
    }

    pub fn ret(&self) -> ReturnClass {
        self.ret
    }

    pub fn fits(&self, budget: RegisterBudget) -> bool {
        self.integer_count <= budget.integer && self.float_count <= budget.float
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banks_fill_independently() {
        let mut frame = RawFrame::new(ReturnClass::Integer);
        frame.push_integer(1).expect("int");
        frame.push_float64(2.0).expect("float");
        frame.push_integer(3).expect("int");
        assert_eq!(frame.integers(), &[1, 3]);
        assert_eq!(frame.floats(), &[2.0]);
        assert!(frame.fits(RegisterBudget::new(6, 8)));
        assert!(!frame.fits(RegisterBudget::new(1, 8)));
    }

    #[test]
    fn float32_occupies_low_bits() {
        let mut frame = RawFrame::new(ReturnClass::Void);
        frame.push_float32(1.5).expect("float");
        assert_eq!(frame.floats()[0].to_bits() as u32, 1.5f32.to_bits());
    }

    #[test]
    fn overflow_is_a_signature_error() {
        let mut frame = RawFrame::new(ReturnClass::Void);
        for word in 0..MAX_INTEGER_REGISTERS as u64 {
            frame.push_integer(word).expect("fits");
        }
        assert!(matches!(
            frame.push_integer(99).unwrap_err(),
            SubstrateError::Signature(_)
        ));
    }
}
