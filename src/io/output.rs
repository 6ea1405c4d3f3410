//! Writer pipeline
//!
//! Entities are packed into blocks on the caller's thread. Compressing and
//! framing a block runs on the [`WorkerPool`]; a writer thread takes the
//! finished frames in submission order and writes them to the sink. An
//! empty frame tells the writer thread to stop.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::config::{PbfOptions, DEFAULT_QUEUE_SIZE};
use crate::error::{OsmError, Result};
use crate::memory::Buffer;
use crate::osm::Entity;
use crate::pbf::{encode_frame, encode_header_block, BlobType, BlockEncoder, FileHeader};
use crate::thread::{deferred_queue, Deferred, QueueReceiver, QueueSender, WorkerPool};

/// Streaming PBF writer
pub struct PbfOutput<W: Write + Send + 'static> {
    pool: Arc<WorkerPool>,
    options: PbfOptions,
    encoder: BlockEncoder,
    header_written: bool,
    queue: Option<QueueSender<Vec<u8>>>,
    writer: Option<JoinHandle<Result<W>>>,
    blocks: usize,
}

impl PbfOutput<BufWriter<File>> {
    /// Create (or truncate) a file for writing
    pub fn create<P: AsRef<Path>>(
        path: P,
        pool: Arc<WorkerPool>,
        options: PbfOptions,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)?;
        info!("Writing PBF file {}", path.display());
        Self::new(BufWriter::new(file), pool, options)
    }
}

impl<W: Write + Send + 'static> PbfOutput<W> {
    pub fn new(sink: W, pool: Arc<WorkerPool>, options: PbfOptions) -> Result<Self> {
        let (queue_tx, queue_rx) = deferred_queue(DEFAULT_QUEUE_SIZE, "output queue");
        let writer = thread::Builder::new()
            .name("osmblock-output".to_string())
            .spawn(move || write_frames(sink, queue_rx))?;

        Ok(PbfOutput {
            pool,
            encoder: BlockEncoder::new(options.clone()),
            options,
            header_written: false,
            queue: Some(queue_tx),
            writer: Some(writer),
            blocks: 0,
        })
    }

    pub fn options(&self) -> &PbfOptions {
        &self.options
    }

    /// Write the file header; must come before any entity
    ///
    /// Without an explicit call a default header is written with the first
    /// block.
    pub fn write_header(&mut self, header: &FileHeader) -> Result<()> {
        if self.header_written {
            return Err(OsmError::InvalidOperation("file header was already written"));
        }
        let data = encode_header_block(header, &self.options)?;
        let method = self.options.compression;
        let handle = self
            .pool
            .submit(move || encode_frame(&data, BlobType::Header, method));
        self.push(handle)?;
        self.header_written = true;
        Ok(())
    }

    /// Add every entity in `buffer`
    pub fn write_buffer(&mut self, buffer: &Buffer<'_>) -> Result<()> {
        for entity in buffer.entities() {
            self.write_entity(&entity?)?;
        }
        Ok(())
    }

    pub fn write_entity(&mut self, entity: &Entity<'_>) -> Result<()> {
        self.ensure_header()?;
        if let Some(block) = self.encoder.push(entity)? {
            self.submit_block(block)?;
        }
        Ok(())
    }

    /// Flush the last block and wait for the writer thread
    ///
    /// Reports the first error of any block. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        self.shutdown().map(|_| ())
    }

    /// Close and hand back the sink
    pub fn finish(mut self) -> Result<W> {
        self.shutdown()?
            .ok_or(OsmError::InvalidOperation("output was already closed"))
    }

    fn ensure_header(&mut self) -> Result<()> {
        if !self.header_written {
            self.write_header(&FileHeader::new())?;
        }
        Ok(())
    }

    fn submit_block(&mut self, block: Vec<u8>) -> Result<()> {
        let method = self.options.compression;
        let handle = self
            .pool
            .submit(move || encode_frame(&block, BlobType::Data, method));
        self.push(handle)?;
        self.blocks += 1;
        Ok(())
    }

    fn push(&mut self, handle: Deferred<Vec<u8>>) -> Result<()> {
        let queue = self
            .queue
            .as_ref()
            .ok_or(OsmError::InvalidOperation("output is closed"))?;
        if queue.push(handle).is_ok() {
            return Ok(());
        }
        // The writer thread stopped early; its error is the interesting one
        self.queue = None;
        match self.join_writer() {
            Err(e) => Err(e),
            Ok(_) => Err(OsmError::ChannelClosed("output queue")),
        }
    }

    fn join_writer(&mut self) -> Result<Option<W>> {
        match self.writer.take() {
            Some(writer) => writer
                .join()
                .map_err(|_| OsmError::WorkerPanicked("output writer thread".to_string()))?
                .map(Some),
            None => Ok(None),
        }
    }

    fn shutdown(&mut self) -> Result<Option<W>> {
        if self.queue.is_none() {
            return self.join_writer();
        }

        let flushed = self.ensure_header().and_then(|()| match self.encoder.finish() {
            Some(block) => self.submit_block(block),
            None => Ok(()),
        });
        if let Err(e) = flushed {
            self.queue = None;
            let _ = self.join_writer();
            return Err(e);
        }

        self.push(Deferred::ready(Vec::new()))?;
        self.queue = None;
        let sink = self.join_writer()?;
        debug!("Output finished after {} data blocks", self.blocks);
        Ok(sink)
    }
}

impl<W: Write + Send + 'static> Drop for PbfOutput<W> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Closing PBF output failed: {}", e);
        }
    }
}

fn write_frames<W: Write>(mut sink: W, queue: QueueReceiver<Vec<u8>>) -> Result<W> {
    while let Some(handle) = queue.pop() {
        let frame = handle.wait()?;
        if frame.is_empty() {
            break;
        }
        sink.write_all(&frame)?;
    }
    sink.flush()?;
    Ok(sink)
}
