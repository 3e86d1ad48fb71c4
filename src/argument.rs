//! Remote method arguments: plain JSON values, XML documents and byte streams.

use serde::Serialize;
use serde_json::Value;
use std::{fmt, io::Cursor};
use tokio::io::AsyncRead;

use crate::error::{Error, Result};

/// One actual argument of a remote method invocation.
#[derive(Debug)]
pub enum Argument {
    /// Plain value, serialized as JSON; `Value::Null` stands for a null argument.
    Value(Value),
    /// XML document, serialized as `text/xml`.
    Document(Document),
    /// Raw bytes pulled from a reader while the request is written.
    Stream(StreamArgument),
}

impl Argument {
    /// Serializes any value into a plain argument.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Argument::Value(serde_json::to_value(value)?))
    }

    pub fn is_document(&self) -> bool {
        matches!(self, Argument::Document(_))
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Argument::Stream(_))
    }
}

impl From<Value> for Argument {
    fn from(value: Value) -> Self {
        Argument::Value(value)
    }
}

impl From<Document> for Argument {
    fn from(document: Document) -> Self {
        Argument::Document(document)
    }
}

impl From<StreamArgument> for Argument {
    fn from(stream: StreamArgument) -> Self {
        Argument::Stream(stream)
    }
}

/// Byte source sent as request content, read while the request body is written.
pub struct StreamArgument {
    reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
}

impl StreamArgument {
    pub fn new(reader: impl AsyncRead + Send + Sync + Unpin + 'static) -> Self {
        Self {
            reader: Box::new(reader),
        }
    }

    /// Stream over an in-memory buffer.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(Cursor::new(bytes.into()))
    }

    pub(crate) fn into_reader(self) -> Box<dyn AsyncRead + Send + Sync + Unpin> {
        self.reader
    }
}

impl fmt::Debug for StreamArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamArgument").finish_non_exhaustive()
    }
}

/// A well-formed XML document, kept in its serialized form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    source: String,
}

impl Document {
    /// Checks that `source` is well-formed XML.
    pub fn parse(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        roxmltree::Document::parse(&source)
            .map_err(|e| Error::InvalidArgument(format!("Malformed XML document: {}", e)))?;
        Ok(Self { source })
    }

    /// Name of the root element.
    pub fn root_name(&self) -> String {
        roxmltree::Document::parse(&self.source)
            .map(|doc| doc.root_element().tag_name().name().to_string())
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.source.into_bytes()
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
