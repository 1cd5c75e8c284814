//! 按名字调用的函数表
//!
//! 启动时把带类型的闭包绑定到名字上，参数类型由泛型在绑定时确定，
//! 运行期以 JSON 参数按名字调用。

use std::collections::HashMap;

use serde::Serialize;
use serde::de::{Deserialize, DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

/// 函数表调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("function {0} is not bound")]
    NotFound(String),

    #[error("function {0} is already bound")]
    AlreadyBound(String),

    #[error("function {name} takes {expected} argument(s), got {got}")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("argument {index} of function {name} is invalid: {reason}")]
    InvalidArgument {
        name: String,
        index: usize,
        reason: String,
    },

    #[error("result of function {name} cannot be serialized: {reason}")]
    Serialize { name: String, reason: String },
}

type Handler = Box<dyn Fn(&str, &[Value]) -> Result<Value, DispatchError> + Send + Sync>;

struct Binding {
    arity: usize,
    handler: Handler,
}

/// 函数表
#[derive(Default)]
pub struct Dispatcher {
    bindings: HashMap<String, Binding>,
}

fn arg<A: DeserializeOwned>(name: &str, args: &[Value], index: usize) -> Result<A, DispatchError> {
    A::deserialize(&args[index]).map_err(|e| DispatchError::InvalidArgument {
        name: name.to_string(),
        index,
        reason: e.to_string(),
    })
}

fn ret<R: Serialize>(name: &str, value: R) -> Result<Value, DispatchError> {
    serde_json::to_value(value).map_err(|e| DispatchError::Serialize {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, name: &str, arity: usize, handler: Handler) -> Result<(), DispatchError> {
        if self.bindings.contains_key(name) {
            return Err(DispatchError::AlreadyBound(name.to_string()));
        }
        self.bindings.insert(name.to_string(), Binding { arity, handler });
        Ok(())
    }

    /// 绑定无参函数
    pub fn bind0<R, F>(&mut self, name: &str, f: F) -> Result<(), DispatchError>
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: Serialize,
    {
        self.insert(name, 0, Box::new(move |name: &str, _: &[Value]| ret(name, f())))
    }

    /// 绑定单参数函数
    pub fn bind1<A, R, F>(&mut self, name: &str, f: F) -> Result<(), DispatchError>
    where
        F: Fn(A) -> R + Send + Sync + 'static,
        A: DeserializeOwned,
        R: Serialize,
    {
        self.insert(
            name,
            1,
            Box::new(move |name: &str, args: &[Value]| {
                ret(name, f(arg(name, args, 0)?))
            }),
        )
    }

    /// 绑定双参数函数
    pub fn bind2<A, B, R, F>(&mut self, name: &str, f: F) -> Result<(), DispatchError>
    where
        F: Fn(A, B) -> R + Send + Sync + 'static,
        A: DeserializeOwned,
        B: DeserializeOwned,
        R: Serialize,
    {
        self.insert(
            name,
            2,
            Box::new(move |name: &str, args: &[Value]| {
                ret(name, f(arg(name, args, 0)?, arg(name, args, 1)?))
            }),
        )
    }

    /// 按名字调用
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, DispatchError> {
        let binding = self
            .bindings
            .get(name)
            .ok_or_else(|| DispatchError::NotFound(name.to_string()))?;
        if args.len() != binding.arity {
            return Err(DispatchError::ArityMismatch {
                name: name.to_string(),
                expected: binding.arity,
                got: args.len(),
            });
        }
        (binding.handler)(name, args)
    }

    /// 调用并把结果解码为具体类型
    pub fn call_as<R: DeserializeOwned>(
        &self,
        name: &str,
        args: &[Value],
    ) -> Result<R, DispatchError> {
        let value = self.call(name, args)?;
        R::deserialize(&value).map_err(|e| DispatchError::Serialize {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn arity(&self, name: &str) -> Option<usize> {
        self.bindings.get(name).map(|binding| binding.arity)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }
}
