//! Content-Length framing of DAP messages.

use crate::dap::tracer::TrafficTracer;
use crate::debugger::Error;
use serde::Serialize;
use serde_json::Value;
use std::io::{BufRead, BufReader, Read, Write};

/// Reading half of a DAP connection.
pub struct FrameReader<R: Read> {
    reader: BufReader<R>,
    tracer: Option<TrafficTracer>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R, tracer: Option<TrafficTracer>) -> Self {
        Self {
            reader: BufReader::new(reader),
            tracer,
        }
    }

    /// Read a single message. Return [`Error::ConnectionClosed`] on a clean EOF.
    pub fn read_message(&mut self) -> Result<Value, Error> {
        let mut content_length: Option<usize> = None;
        loop {
            let mut line = String::new();
            let read_n = self.reader.read_line(&mut line)?;
            if read_n == 0 {
                return Err(Error::ConnectionClosed);
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            if let Some(v) = line.strip_prefix("Content-Length:") {
                let len = v.trim().parse().map_err(|_| {
                    Error::ProtocolViolation(format!("invalid Content-Length header: {line}"))
                })?;
                content_length = Some(len);
            }
        }

        let len = content_length
            .ok_or_else(|| Error::ProtocolViolation("missing Content-Length header".into()))?;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        let msg: Value = serde_json::from_slice(&buf)?;
        if let Some(tracer) = &self.tracer {
            tracer.line(&format!("<- {msg}"));
        }
        Ok(msg)
    }
}

/// Writing half of a DAP connection.
pub struct FrameWriter<W: Write> {
    writer: W,
    tracer: Option<TrafficTracer>,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(writer: W, tracer: Option<TrafficTracer>) -> Self {
        Self { writer, tracer }
    }

    pub fn write_message<T: Serialize>(&mut self, v: &T) -> Result<(), Error> {
        let payload = serde_json::to_vec(v)?;
        if let Some(tracer) = &self.tracer {
            tracer.line(&format!("-> {}", String::from_utf8_lossy(&payload)));
        }
        write!(self.writer, "Content-Length: {}\r\n\r\n", payload.len())?;
        self.writer.write_all(&payload)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }
}
