use std::fmt;

use crate::error::{Error, Result};

/// A typed parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(v) => f.write_str(v),
        }
    }
}

/// Constraint checked whenever a parameter is set
#[derive(Debug, Clone, Copy)]
pub(crate) enum Check {
    Any,
    NonNegative,
    Positive,
    AtLeastOne,
    OneOf(&'static [&'static str]),
}

impl Check {
    fn validate(self, name: &str, value: &Value) -> Result<()> {
        let number = match value {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Str(_) => None,
        };
        let ok = match (self, number, value) {
            (Check::Any, _, _) => true,
            (Check::NonNegative, Some(n), _) => n >= 0.0,
            (Check::Positive, Some(n), _) => n > 0.0,
            (Check::AtLeastOne, Some(n), _) => n >= 1.0,
            (Check::OneOf(choices), _, Value::Str(s)) => choices.contains(&s.as_str()),
            _ => false,
        };
        if ok {
            return Ok(());
        }
        let reason = match self {
            Check::Any => "is invalid".to_string(),
            Check::NonNegative => "must be non-negative".to_string(),
            Check::Positive => "must be positive".to_string(),
            Check::AtLeastOne => "must be at least 1".to_string(),
            Check::OneOf(choices) => format!("must be one of {}", choices.join(", ")),
        };
        Err(Error::InvalidParameter(format!("{} {}", name, reason)))
    }
}

#[derive(Debug, Clone)]
struct Param {
    name: &'static str,
    value: Value,
    check: Check,
    help: &'static str,
}

/// A flat table of named training parameters
///
/// Values are set from strings and parsed into the type declared with the
/// default, so a table reads and writes like a configuration file.
#[derive(Debug, Clone, Default)]
pub struct Params {
    entries: Vec<Param>,
}

impl Params {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn push(mut self, name: &'static str, value: Value, check: Check, help: &'static str) -> Self {
        self.entries.push(Param {
            name,
            value,
            check,
            help,
        });
        self
    }

    pub(crate) fn int(self, name: &'static str, default: i64, check: Check, help: &'static str) -> Self {
        self.push(name, Value::Int(default), check, help)
    }

    pub(crate) fn float(self, name: &'static str, default: f64, check: Check, help: &'static str) -> Self {
        self.push(name, Value::Float(default), check, help)
    }

    pub(crate) fn string(
        self,
        name: &'static str,
        default: &str,
        check: Check,
        help: &'static str,
    ) -> Self {
        self.push(name, Value::Str(default.to_string()), check, help)
    }

    /// Append the entries of `other`
    pub(crate) fn merge(mut self, other: Params) -> Self {
        self.entries.extend(other.entries);
        self
    }

    fn find(&self, name: &str) -> Result<&Param> {
        self.entries
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::UnknownParameter(name.to_string()))
    }

    /// Parse `value` into the type of `name` and store it.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        let param = self
            .entries
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::UnknownParameter(name.to_string()))?;
        let value = value.trim();
        let parsed = match param.value {
            Value::Int(_) => value.parse::<i64>().map(Value::Int).map_err(|_| {
                Error::InvalidParameter(format!("{} must be an integer, got {:?}", name, value))
            })?,
            Value::Float(_) => value.parse::<f64>().map(Value::Float).map_err(|_| {
                Error::InvalidParameter(format!("{} must be a number, got {:?}", name, value))
            })?,
            Value::Str(_) => Value::Str(value.to_string()),
        };
        param.check.validate(name, &parsed)?;
        param.value = parsed;
        Ok(())
    }

    /// The current value of `name`, formatted as a string
    pub fn get(&self, name: &str) -> Result<String> {
        Ok(self.find(name)?.value.to_string())
    }

    pub fn value(&self, name: &str) -> Result<&Value> {
        Ok(&self.find(name)?.value)
    }

    /// One-line description of `name`
    pub fn help(&self, name: &str) -> Result<&'static str> {
        Ok(self.find(name)?.help)
    }

    /// Parameter names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|p| p.name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn get_int(&self, name: &str) -> Result<i64> {
        match self.find(name)?.value {
            Value::Int(v) => Ok(v),
            _ => Err(Error::InternalLogic(format!("{} is not an integer", name))),
        }
    }

    /// Non-negative integer parameter as a count.
    pub(crate) fn get_usize(&self, name: &str) -> Result<usize> {
        let v = self.get_int(name)?;
        usize::try_from(v)
            .map_err(|_| Error::InvalidParameter(format!("{} must be non-negative", name)))
    }

    pub(crate) fn get_bool(&self, name: &str) -> Result<bool> {
        Ok(self.get_int(name)? != 0)
    }

    pub(crate) fn get_float(&self, name: &str) -> Result<f64> {
        match self.find(name)?.value {
            Value::Float(v) => Ok(v),
            _ => Err(Error::InternalLogic(format!("{} is not a float", name))),
        }
    }

    pub(crate) fn get_str(&self, name: &str) -> Result<&str> {
        match &self.find(name)?.value {
            Value::Str(v) => Ok(v),
            _ => Err(Error::InternalLogic(format!("{} is not a string", name))),
        }
    }
}
