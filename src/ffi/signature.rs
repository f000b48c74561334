//! Native signature descriptors.
//!
//! Two spellings are accepted: a space separated list whose first token is the return type
//! (`"int32 float64 pointer"`), and the C-like form (`"int32(float64, pointer)"`). `void` is
//! only valid as the return type or as the sole argument list entry `(void)`.

use std::fmt;
use std::str::FromStr;

use crate::{SubstrateError, SubstrateResult};

/// Primitive types a native function can take or return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeType {
    Void,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
    Pointer,
}

/// Register class a type travels in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgClass {
    Integer,
    Float,
}

impl NativeType {
    pub fn from_token(token: &str) -> Option<Self> {
        let ty = match token.to_ascii_lowercase().as_str() {
            "void" => NativeType::Void,
            "int8" | "i8" | "char" => NativeType::Int8,
            "int16" | "i16" | "short" => NativeType::Int16,
            "int" | "int32" | "i32" => NativeType::Int32,
            "int64" | "i64" | "long" => NativeType::Int64,
            "uint8" | "u8" | "byte" | "bool" => NativeType::Uint8,
            "uint16" | "u16" => NativeType::Uint16,
            "uint" | "uint32" | "u32" | "unsigned" => NativeType::Uint32,
            "uint64" | "u64" => NativeType::Uint64,
            "float" | "float32" | "f32" => NativeType::Float32,
            "double" | "float64" | "f64" => NativeType::Float64,
            "pointer" | "ptr" | "void*" => NativeType::Pointer,
            _ => return None,
        };
        Some(ty)
    }

    pub fn name(&self) -> &'static str {
        match self {
            NativeType::Void => "void",
            NativeType::Int8 => "int8",
            NativeType::Int16 => "int16",
            NativeType::Int32 => "int32",
            NativeType::Int64 => "int64",
            NativeType::Uint8 => "uint8",
            NativeType::Uint16 => "uint16",
            NativeType::Uint32 => "uint32",
            NativeType::Uint64 => "uint64",
            NativeType::Float32 => "float32",
            NativeType::Float64 => "float64",
            NativeType::Pointer => "pointer",
        }
    }

    /// Register class, or `None` for `void`.
    pub fn class(&self) -> Option<ArgClass> {
        match self {
            NativeType::Void => None,
            NativeType::Float32 | NativeType::Float64 => Some(ArgClass::Float),
            NativeType::Int8
            | NativeType::Int16
            | NativeType::Int32
            | NativeType::Int64
            | NativeType::Uint8
            | NativeType::Uint16
            | NativeType::Uint32
            | NativeType::Uint64
            | NativeType::Pointer => Some(ArgClass::Integer),
        }
    }

    /// Width in bits of integer types; pointers use the target's word size.
    pub fn integer_bits(&self) -> Option<u32> {
        match self {
            NativeType::Int8 | NativeType::Uint8 => Some(8),
            NativeType::Int16 | NativeType::Uint16 => Some(16),
            NativeType::Int32 | NativeType::Uint32 => Some(32),
            NativeType::Int64 | NativeType::Uint64 => Some(64),
            NativeType::Pointer => Some(usize::BITS),
            NativeType::Void | NativeType::Float32 | NativeType::Float64 => None,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            NativeType::Int8 | NativeType::Int16 | NativeType::Int32 | NativeType::Int64
        )
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parsed return type and argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    ret: NativeType,
    args: Vec<NativeType>,
}

impl Signature {
    pub fn new(ret: NativeType, args: Vec<NativeType>) -> SubstrateResult<Self> {
        if let Some(position) = args.iter().position(|ty| *ty == NativeType::Void) {
            return Err(SubstrateError::Signature(format!(
                "argument {} cannot be void",
                position + 1
            )));
        }
        Ok(Self { ret, args })
    }

    pub fn parse(text: &str) -> SubstrateResult<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SubstrateError::Signature("empty signature".into()));
        }
        match text.find('(') {
            Some(open) => Self::parse_call_form(text, open),
            None => {
                let mut tokens = text.split_whitespace();
                let ret = tokens.next().map(token).transpose()?.unwrap_or(NativeType::Void);
                let args = tokens.map(token).collect::<SubstrateResult<Vec<_>>>()?;
                Self::new(ret, args)
            }
        }
    }

    fn parse_call_form(text: &str, open: usize) -> SubstrateResult<Self> {
        let Some(inner) = text[open + 1..].strip_suffix(')') else {
            return Err(SubstrateError::Signature(format!(
                "`{text}` is missing a closing parenthesis"
            )));
        };
        if inner.contains(['(', ')']) {
            return Err(SubstrateError::Signature(format!("nested parentheses in `{text}`")));
        }
        let ret = token(text[..open].trim())?;
        let inner = inner.trim();
        let args = if inner.is_empty() || inner.eq_ignore_ascii_case("void") {
            Vec::new()
        } else {
            inner
                .split(',')
                .map(|part| token(part.trim()))
                .collect::<SubstrateResult<Vec<_>>>()?
        };
        Self::new(ret, args)
    }

    pub fn ret(&self) -> NativeType {
        self.ret
    }

    pub fn args(&self) -> &[NativeType] {
        &self.args
    }

    /// Integer and float register slots the arguments need.
    pub fn register_demand(&self) -> (usize, usize) {
        self.args
            .iter()
            .fold((0, 0), |(ints, floats), ty| match ty.class() {
                Some(ArgClass::Float) => (ints, floats + 1),
                Some(ArgClass::Integer) => (ints + 1, floats),
                None => (ints, floats),
            })
    }
}

fn token(text: &str) -> SubstrateResult<NativeType> {
    if text.is_empty() {
        return Err(SubstrateError::Signature("missing type name".into()));
    }
    NativeType::from_token(text)
        .ok_or_else(|| SubstrateError::Signature(format!("unknown type `{text}`")))
}

impl FromStr for Signature {
    type Err = SubstrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Signature::parse(s)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.ret)?;
        for (index, arg) in self.args.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_space_separated_form() {
        let sig = Signature::parse("int32 float64 pointer").expect("parse");
        assert_eq!(sig.ret(), NativeType::Int32);
        assert_eq!(sig.args(), &[NativeType::Float64, NativeType::Pointer]);
        assert_eq!(sig.register_demand(), (1, 1));
    }

    #[test]
    fn parses_call_form_and_aliases() {
        let sig = Signature::parse("double (int, u8 ,float)").expect("parse");
        assert_eq!(sig.ret(), NativeType::Float64);
        assert_eq!(
            sig.args(),
            &[NativeType::Int32, NativeType::Uint8, NativeType::Float32]
        );
        assert_eq!(sig.to_string(), "float64(int32, uint8, float32)");
    }

    #[test]
    fn void_forms() {
        assert!(Signature::parse("void").expect("void").args().is_empty());
        assert!(Signature::parse("void(void)").expect("void(void)").args().is_empty());
        assert!(Signature::parse("int()").expect("int()").args().is_empty());
    }

    #[test]
    fn malformed_signatures_are_rejected() {
        for bad in ["", "int int9", "int(void, int)", "int(int", "int(int,)", "int void"] {
            let err = Signature::parse(bad).unwrap_err();
            assert!(matches!(err, SubstrateError::Signature(_)), "{bad}: {err:?}");
        }
    }
}
