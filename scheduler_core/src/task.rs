use std::{any::Any, collections::HashMap, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{error::SchedulerError, worker::Method};

/// Caller state a task runs against. Named callables are looked up here at
/// dispatch time, never at enqueue time.
///
/// Callables get the context back as `Arc<dyn Context>` and reach the concrete
/// state through `downcast_ref`.
pub trait Context: AsAny + Send + Sync {
    fn method(&self, _name: &str) -> Option<Method> {
        None
    }
}

pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn Context {
    pub fn downcast_ref<T: Context + 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn is<T: Context + 'static>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

impl Context for HashMap<String, Method> {
    fn method(&self, name: &str) -> Option<Method> {
        self.get(name).cloned()
    }
}

#[derive(Clone)]
pub enum Callable {
    Method(Method),
    Name(String),
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Method(_) => write!(f, "Method(..)"),
            Callable::Name(name) => f.debug_tuple("Name").field(name).finish(),
        }
    }
}

impl From<Method> for Callable {
    fn from(method: Method) -> Self {
        Callable::Method(method)
    }
}

impl From<&str> for Callable {
    fn from(name: &str) -> Self {
        Callable::Name(name.to_string())
    }
}

impl From<String> for Callable {
    fn from(name: String) -> Self {
        Callable::Name(name)
    }
}

/// A unit of deferred work. Context and callable may be left empty and are
/// then filled from the scheduler's binding when the task is queued.
#[derive(Clone)]
pub struct Task {
    pub id: Uuid,
    pub context: Option<Arc<dyn Context>>,
    pub callable: Option<Callable>,
    pub args: Vec<Value>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            context: None,
            callable: None,
            args: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_method(method: Method) -> Self {
        Self::new().callable(method)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::new().callable(Callable::Name(name.into()))
    }

    pub fn callable(mut self, callable: impl Into<Callable>) -> Self {
        self.callable = Some(callable.into());
        self
    }

    pub fn context(mut self, context: Arc<dyn Context>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn descriptor(&self) -> TaskDescriptor {
        TaskDescriptor {
            id: self.id,
            method: match &self.callable {
                Some(Callable::Name(name)) => Some(name.clone()),
                Some(Callable::Method(_)) => Some("<fn>".to_string()),
                None => None,
            },
            args: self.args.clone(),
            has_context: self.context.is_some(),
            created_at: self.created_at,
        }
    }

    pub(crate) fn resolve(&self) -> Result<Method, SchedulerError> {
        match &self.callable {
            Some(Callable::Method(method)) => Ok(method.clone()),
            Some(Callable::Name(name)) => {
                let context = self.context.as_ref().ok_or_else(|| {
                    SchedulerError::Invocation(format!("method `{}` requested but the task has no context", name))
                })?;
                context
                    .method(name)
                    .ok_or_else(|| SchedulerError::Invocation(format!("context has no method `{}`", name)))
            }
            None => Err(SchedulerError::Invocation(
                "task has no callable and the scheduler has no binding".to_string(),
            )),
        }
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("callable", &self.callable)
            .field("args", &self.args)
            .field("has_context", &self.context.is_some())
            .finish()
    }
}

impl From<Task> for Vec<Task> {
    fn from(task: Task) -> Self {
        vec![task]
    }
}

/// Serializable snapshot of a task, for logs and observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub id: Uuid,
    pub method: Option<String>,
    pub args: Vec<Value>,
    pub has_context: bool,
    pub created_at: DateTime<Utc>,
}
