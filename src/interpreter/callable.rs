use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::ast::Function;
use crate::interpreter::environment::Env;
use crate::interpreter::value::{LoxInstance, Value};

/// Something callable in Lox: a user function (possibly bound to an
/// instance) or a built-in native.
#[derive(Debug, Clone)]
pub enum Callable {
    Native(NativeFunction),
    User(LoxFunction),
}

impl Callable {
    pub fn name(&self) -> &str {
        match self {
            Self::Native(n) => n.name(),
            Self::User(u) => &u.declaration.name,
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Self::Native(n) => n.arity(),
            Self::User(u) => u.declaration.params.len(),
        }
    }

    /// Bind a method to an instance: a one-slot scope defining `this` is
    /// wedged between the method and its closure.
    pub fn bind(&self, instance: Rc<RefCell<LoxInstance>>) -> Self {
        match self {
            Self::Native(_) => unreachable!("natives are never class methods"),
            Self::User(u) => {
                let env = u.closure.child();
                env.define("this", Value::Instance(instance));
                Self::User(LoxFunction {
                    declaration: u.declaration.clone(),
                    closure: env,
                    is_initializer: u.is_initializer,
                })
            }
        }
    }
}

impl fmt::Display for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native(_) => write!(f, "<native fn>"),
            Self::User(u) => write!(f, "<fn {}>", u.declaration.name),
        }
    }
}

/// A user-defined Lox function closing over its defining scope.
#[derive(Debug, Clone)]
pub struct LoxFunction {
    pub declaration: Function,
    pub closure: Env,
    pub is_initializer: bool,
}

/// The fixed set of built-ins.
#[derive(Debug, Clone, Copy)]
pub enum NativeFunction {
    Clock,
}

impl NativeFunction {
    pub fn name(&self) -> &str {
        match self {
            Self::Clock => "clock",
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Self::Clock => 0,
        }
    }

    pub fn call(&self, _args: &[Value]) -> Value {
        match self {
            Self::Clock => {
                use std::time::{SystemTime, UNIX_EPOCH};
                let secs = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .expect("system clock should be after unix epoch")
                    .as_secs_f64();
                Value::Number(secs)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_display() {
        let clock = Callable::Native(NativeFunction::Clock);
        assert_eq!(clock.to_string(), "<native fn>");
        assert_eq!(clock.name(), "clock");
        assert_eq!(clock.arity(), 0);
    }

    #[test]
    fn clock_returns_number() {
        let value = NativeFunction::Clock.call(&[]);
        assert!(matches!(value, Value::Number(n) if n > 0.0));
    }
}
