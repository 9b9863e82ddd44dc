use std::{fmt, str::FromStr};

use libm::{exp, sin};

use crate::net::error::Error;

/// The closed set of functions the cluster knows how to integrate. The
/// discriminants are the numeric ids carried on the wire.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FunctionId {
    Exp = 0,
    Sin = 1,
    Sqr = 2,
}

impl FunctionId {
    pub const ALL: [FunctionId; 3] = [FunctionId::Exp, FunctionId::Sin, FunctionId::Sqr];

    pub fn id(self) -> i32 {
        self as i32
    }

    pub fn eval(self, x: f64) -> f64 {
        match self {
            FunctionId::Exp => exp(x),
            FunctionId::Sin => sin(x),
            FunctionId::Sqr => x * x,
        }
    }
}

impl TryFrom<i32> for FunctionId {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FunctionId::Exp),
            1 => Ok(FunctionId::Sin),
            2 => Ok(FunctionId::Sqr),
            other => Err(Error::UnsupportedFunction(other)),
        }
    }
}

impl FromStr for FunctionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exp" => Ok(FunctionId::Exp),
            "sin" => Ok(FunctionId::Sin),
            "sqr" => Ok(FunctionId::Sqr),
            other => match other.parse::<i32>() {
                Ok(id) => FunctionId::try_from(id),
                Err(_) => Err(Error::UnknownFunctionName(s.to_owned())),
            },
        }
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionId::Exp => write!(f, "exp"),
            FunctionId::Sin => write!(f, "sin"),
            FunctionId::Sqr => write!(f, "sqr"),
        }
    }
}
