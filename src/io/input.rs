//! Reader pipeline
//!
//! ```text
//!  reader ──> producer thread ──frames──> WorkerPool (decompress + decode)
//!                   │                            │
//!                   └── handles, file order ─> queue ──> PbfInput::read()
//! ```
//!
//! The producer decodes the header block itself and hands it over through
//! a one-shot channel. Data blocks are decoded on the pool; the bounded
//! queue of handles keeps them in file order. End of input is signalled by
//! an invalid [`Buffer`].

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::config::ReaderOptions;
use crate::error::{OsmError, Result};
use crate::memory::Buffer;
use crate::pbf::{
    decode_blob, decode_header_block, decode_primitive_block, read_frame, BlobType, FileHeader,
};
use crate::thread::{deferred_queue, Deferred, QueueReceiver, QueueSender, WorkerPool};

/// Streaming PBF reader
pub struct PbfInput {
    header_rx: Option<Receiver<Result<FileHeader>>>,
    header: Option<FileHeader>,
    queue: Option<QueueReceiver<Buffer<'static>>>,
    stop: Arc<AtomicBool>,
    producer: Option<JoinHandle<()>>,
    done: bool,
}

impl PbfInput {
    /// Start reading from `reader`
    ///
    /// Returns as soon as the producer thread runs; nothing has been read
    /// at that point.
    pub fn open<R>(reader: R, pool: Arc<WorkerPool>, options: ReaderOptions) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (header_tx, header_rx) = channel::bounded(1);
        let (queue_tx, queue_rx) = deferred_queue(options.queue_size, "input queue");
        let stop = Arc::new(AtomicBool::new(false));

        let producer = Producer {
            reader,
            pool,
            options,
            queue: queue_tx,
            stop: Arc::clone(&stop),
        };
        let handle = thread::Builder::new()
            .name("osmblock-input".to_string())
            .spawn(move || producer.run(header_tx))?;

        Ok(PbfInput {
            header_rx: Some(header_rx),
            header: None,
            queue: Some(queue_rx),
            stop,
            producer: Some(handle),
            done: false,
        })
    }

    /// Open a file for reading
    pub fn from_path<P: AsRef<Path>>(
        path: P,
        pool: Arc<WorkerPool>,
        options: ReaderOptions,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        info!("Reading PBF file {}", path.display());
        Self::open(BufReader::new(file), pool, options)
    }

    /// The file header, blocking until the producer has decoded it
    pub fn header(&mut self) -> Result<&FileHeader> {
        if self.header.is_none() {
            let rx = self
                .header_rx
                .take()
                .ok_or(OsmError::InvalidOperation("file header is not available"))?;
            let header = rx
                .recv()
                .map_err(|_| OsmError::ChannelClosed("file header"))??;
            self.header = Some(header);
        }
        self.header
            .as_ref()
            .ok_or(OsmError::InvalidOperation("file header is not available"))
    }

    /// Next decoded block
    ///
    /// Blocks until the next block in file order is ready. At the end of
    /// input (and on every call after it) the returned buffer is invalid.
    /// An error here concerns a single block; decode errors leave later
    /// blocks readable, framing and I/O errors are followed by the end of
    /// input.
    pub fn read(&mut self) -> Result<Buffer<'static>> {
        if self.done {
            return Ok(Buffer::invalid());
        }
        let Some(handle) = self.queue.as_ref().and_then(QueueReceiver::pop) else {
            self.done = true;
            return Ok(Buffer::invalid());
        };

        let buffer = handle.wait()?;
        if !buffer.is_valid() {
            self.done = true;
        }
        Ok(buffer)
    }

    /// Stop reading and join the producer thread
    ///
    /// Queued blocks are discarded. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Release);
        self.done = true;
        self.header_rx = None;

        if let Some(queue) = self.queue.take() {
            queue.drain();
        }

        if let Some(producer) = self.producer.take() {
            producer
                .join()
                .map_err(|_| OsmError::WorkerPanicked("input producer thread".to_string()))?;
            debug!("Input producer thread joined");
        }
        Ok(())
    }
}

impl Iterator for PbfInput {
    type Item = Result<Buffer<'static>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read() {
            Ok(buffer) if !buffer.is_valid() => None,
            other => Some(other),
        }
    }
}

impl Drop for PbfInput {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Closing PBF input failed: {}", e);
        }
    }
}

struct Producer<R> {
    reader: R,
    pool: Arc<WorkerPool>,
    options: ReaderOptions,
    queue: QueueSender<Buffer<'static>>,
    stop: Arc<AtomicBool>,
}

impl<R: Read> Producer<R> {
    fn run(mut self, header_tx: Sender<Result<FileHeader>>) {
        match self.read_header() {
            Ok(header) => {
                let _ = header_tx.send(Ok(header));
            }
            Err(e) => {
                warn!("Reading file header failed: {}", e);
                let message = e.to_string();
                let _ = header_tx.send(Err(e));
                let _ = self.queue.push(Deferred::failed(OsmError::Stream(message)));
                self.finish(0);
                return;
            }
        }
        drop(header_tx);

        if self.options.entities.is_empty() {
            self.finish(0);
            return;
        }

        let mut blocks = 0usize;
        while !self.stop.load(Ordering::Acquire) {
            let (handle, fatal) = match read_frame(&mut self.reader) {
                Ok(None) => break,
                Ok(Some(frame)) => match frame.expect(BlobType::Data) {
                    Ok(()) => {
                        let filter = self.options.entities;
                        let handle = self.pool.submit(move || {
                            let data = decode_blob(&frame.blob)?;
                            decode_primitive_block(&data, filter)
                        });
                        (handle, false)
                    }
                    Err(e) => (Deferred::failed(e), true),
                },
                Err(e) => (Deferred::failed(e), true),
            };

            if self.queue.push(handle).is_err() {
                debug!("Input closed by the consumer after {} blocks", blocks);
                return;
            }
            if fatal {
                break;
            }
            blocks += 1;
        }

        self.finish(blocks);
    }

    fn read_header(&mut self) -> Result<FileHeader> {
        let frame = read_frame(&mut self.reader)?.ok_or(OsmError::Truncated("file header"))?;
        frame.expect(BlobType::Header)?;
        decode_header_block(&decode_blob(&frame.blob)?)
    }

    fn finish(&self, blocks: usize) {
        if self.queue.push(Deferred::ready(Buffer::invalid())).is_ok() {
            debug!("Input finished after {} data blocks", blocks);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PbfOptions;
    use crate::osm::{EntityBits, Location, NodeData};
    use crate::pbf::{encode_frame, encode_header_block};
    use crate::compression::CompressionMethod;
    use std::io::Cursor;

    fn header_frame() -> Vec<u8> {
        let data = encode_header_block(&FileHeader::new(), &PbfOptions::default()).unwrap();
        encode_frame(&data, BlobType::Header, CompressionMethod::Zlib).unwrap()
    }

    fn node_frame(id: i64) -> Vec<u8> {
        let mut buffer = Buffer::new();
        buffer
            .push_node(&NodeData::new(id, Location::new(id as i32, 0)))
            .unwrap();
        let mut encoder = crate::pbf::BlockEncoder::new(PbfOptions::default());
        for entity in buffer.entities() {
            assert!(encoder.push(&entity.unwrap()).unwrap().is_none());
        }
        let block = encoder.finish().unwrap();
        encode_frame(&block, BlobType::Data, CompressionMethod::Zlib).unwrap()
    }

    fn pool() -> Arc<WorkerPool> {
        Arc::new(WorkerPool::new(2).unwrap())
    }

    #[test]
    fn test_reads_blocks_in_order() {
        let mut file = header_frame();
        for id in 1..=5 {
            file.extend(node_frame(id));
        }

        let mut input = PbfInput::open(Cursor::new(file), pool(), ReaderOptions::default()).unwrap();
        assert!(input.header().unwrap().get("generator").is_some());

        let ids: Vec<i64> = input
            .by_ref()
            .map(|buffer| buffer.unwrap().entities().next().unwrap().unwrap().id())
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);

        assert!(!input.read().unwrap().is_valid());
        assert!(!input.read().unwrap().is_valid());
        input.close().unwrap();
        input.close().unwrap();
    }

    #[test]
    fn test_missing_header() {
        let mut input =
            PbfInput::open(Cursor::new(node_frame(1)), pool(), ReaderOptions::default()).unwrap();
        assert!(matches!(
            input.header(),
            Err(OsmError::UnexpectedBlobType { .. })
        ));
        assert!(matches!(input.read(), Err(OsmError::Stream(_))));
        assert!(!input.read().unwrap().is_valid());
    }

    #[test]
    fn test_empty_filter_reads_header_only() {
        let mut file = header_frame();
        file.extend(node_frame(1));
        let options = ReaderOptions::with_entities(EntityBits::NOTHING);

        let mut input = PbfInput::open(Cursor::new(file), pool(), options).unwrap();
        assert!(input.header().is_ok());
        assert!(!input.read().unwrap().is_valid());
    }

    #[test]
    fn test_truncated_input_ends_stream() {
        let mut file = header_frame();
        file.extend(node_frame(1));
        let second = node_frame(2);
        file.extend(&second[..second.len() / 2]);

        let mut input = PbfInput::open(Cursor::new(file), pool(), ReaderOptions::default()).unwrap();
        assert!(input.read().unwrap().is_valid());
        assert!(matches!(input.read(), Err(OsmError::Truncated(_))));
        assert!(!input.read().unwrap().is_valid());
    }

    #[test]
    fn test_close_before_reading() {
        let mut file = header_frame();
        for id in 0..50 {
            file.extend(node_frame(id));
        }
        let options = ReaderOptions {
            queue_size: 2,
            ..Default::default()
        };

        let mut input = PbfInput::open(Cursor::new(file), pool(), options).unwrap();
        input.close().unwrap();
        assert!(!input.read().unwrap().is_valid());
        assert!(input.header().is_err());
    }
}
