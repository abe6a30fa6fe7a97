use std::error::Error as StdError;

/// Captured error data attached to a log entry.
///
/// A recursive snapshot of an error tree: the message and type name are
/// always present, everything else is optional. Cycles cannot occur since
/// the record is always built from an already-captured tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExceptionData {
    pub message: String,
    pub type_name: String,
    pub stack_trace: Option<String>,
    pub inner: Option<Box<ExceptionData>>,
    /// Inner errors of an aggregate failure (joined tasks, batched IO).
    pub aggregated: Option<Vec<ExceptionData>>,
    /// Loader failures reported alongside the main error.
    pub loader_exceptions: Option<Vec<ExceptionData>>,
    pub fusion_log: Option<String>,
}

impl ExceptionData {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> ExceptionData {
        ExceptionData {
            message: message.into(),
            type_name: type_name.into(),
            ..ExceptionData::default()
        }
    }

    pub fn with_stack_trace(mut self, stack: impl Into<String>) -> ExceptionData {
        self.stack_trace = Some(stack.into());
        self
    }

    pub fn with_inner(mut self, inner: ExceptionData) -> ExceptionData {
        self.inner = Some(Box::new(inner));
        self
    }

    pub fn with_aggregated(mut self, aggregated: Vec<ExceptionData>) -> ExceptionData {
        self.aggregated = Some(aggregated);
        self
    }

    /// Capture a [`std::error::Error`] chain; each `source()` becomes the
    /// inner record of its parent. Sources have no reachable concrete type
    /// behind the trait object, so they are typed `"source"`.
    pub fn from_error<E: StdError>(error: &E) -> ExceptionData {
        let mut data = ExceptionData::new(std::any::type_name::<E>(), error.to_string());
        let mut tail = &mut data;
        let mut source = error.source();
        while let Some(cause) = source {
            tail.inner = Some(Box::new(ExceptionData::new("source", cause.to_string())));
            tail = tail.inner.as_mut().expect("just set");
            source = cause.source();
        }
        data
    }

    /// Depth of the `inner` chain, the record itself included.
    pub fn chain_len(&self) -> usize {
        1 + self.inner.as_deref().map_or(0, ExceptionData::chain_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_error_follows_the_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let wrapped = crate::Error::from(io);
        let data = ExceptionData::from_error(&wrapped);

        assert!(data.message.contains("disk on fire"));
        assert_eq!(data.chain_len(), 2);
    }

    #[test]
    fn builders_fill_optionals() {
        let data = ExceptionData::new("TimeoutError", "deadline elapsed")
            .with_stack_trace("frame 0\nframe 1")
            .with_inner(ExceptionData::new("IoError", "broken pipe"));

        assert_eq!(data.type_name, "TimeoutError");
        assert!(data.stack_trace.is_some());
        assert_eq!(data.inner.unwrap().message, "broken pipe");
    }
}
