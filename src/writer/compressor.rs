//! The compressor: dequeues header/data slots from the walker, runs
//! payload bytes through a single rolling deflate stream, and packs the
//! output into fixed-size block bodies (spec §4.2 "Compressor
//! responsibilities"). Headers bypass compression entirely; the byte
//! offset of the first one written into each block becomes that
//! block's `hdroffs` — the reader's resynchronization primitive after a
//! lost block.

use std::time::{SystemTime, UNIX_EPOCH};

use flate2::{Compress, Compression, FlushCompress, Status};

use crate::header;
use crate::history::HistoryRecord;
use crate::queue::SlotQueue;
use crate::writer::{FilledBlock, ProducerSlot};

struct BlockBuilder {
    body: Vec<u8>,
    pos: usize,
    hdroffs: Option<u32>,
}

impl BlockBuilder {
    fn new(body_len: usize) -> Self {
        Self { body: vec![0u8; body_len], pos: 0, hdroffs: None }
    }
    fn remaining(&self) -> usize {
        self.body.len() - self.pos
    }
    fn is_full(&self) -> bool {
        self.remaining() == 0
    }
}

fn now_ns() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0)
}

fn emit_block(block: &mut BlockBuilder, block_q: &SlotQueue<Option<FilledBlock>>, finished: &mut u64) {
    let body_len = block.body.len();
    let filled = std::mem::replace(block, BlockBuilder::new(body_len));
    block_q.enqueue(Some(FilledBlock { body: filled.body, hdroffs: filled.hdroffs.unwrap_or(0) }));
    *finished += 1;
}

fn copy_into_blocks(
    mut src: &[u8],
    block: &mut BlockBuilder,
    block_q: &SlotQueue<Option<FilledBlock>>,
    finished: &mut u64,
) {
    while !src.is_empty() {
        let n = src.len().min(block.remaining());
        let start = block.pos;
        block.body[start..start + n].copy_from_slice(&src[..n]);
        block.pos += n;
        src = &src[n..];
        if block.is_full() {
            emit_block(block, block_q, finished);
        }
    }
}

fn deflate_into_blocks(
    c: &mut Compress,
    mut input: &[u8],
    block: &mut BlockBuilder,
    block_q: &SlotQueue<Option<FilledBlock>>,
    finished: &mut u64,
) {
    while !input.is_empty() {
        if block.is_full() {
            emit_block(block, block_q, finished);
        }
        let before_in = c.total_in();
        let before_out = c.total_out();
        let status = c
            .compress(input, &mut block.body[block.pos..], FlushCompress::None)
            .expect("deflate stream corrupted");
        let consumed = (c.total_in() - before_in) as usize;
        let produced = (c.total_out() - before_out) as usize;
        block.pos += produced;
        input = &input[consumed..];
        debug_assert!(status != Status::StreamEnd, "deflate stream ended before Finish");
    }
}

/// Flush and close the deflate stream (spec: "flushed and closed when a
/// passthrough or sentinel is seen").
fn finish_deflate(c: &mut Compress, block: &mut BlockBuilder, block_q: &SlotQueue<Option<FilledBlock>>, finished: &mut u64) {
    loop {
        if block.is_full() {
            emit_block(block, block_q, finished);
        }
        let before_out = c.total_out();
        let status = c
            .compress(&[], &mut block.body[block.pos..], FlushCompress::Finish)
            .expect("deflate stream corrupted");
        let produced = (c.total_out() - before_out) as usize;
        block.pos += produced;
        if status == Status::StreamEnd {
            break;
        }
    }
}

pub(crate) fn run(
    producer_q: &SlotQueue<ProducerSlot>,
    free_q: &SlotQueue<Vec<u8>>,
    block_q: &SlotQueue<Option<FilledBlock>>,
    history_q: &SlotQueue<Option<HistoryRecord>>,
    body_len: usize,
    saveset_id: &str,
) {
    let mut deflate: Option<Compress> = None;
    let mut block = BlockBuilder::new(body_len);
    let mut finished: u64 = 0;

    loop {
        match producer_q.dequeue() {
            ProducerSlot::Header(bytes) => {
                if let Some(mut c) = deflate.take() {
                    finish_deflate(&mut c, &mut block, block_q, &mut finished);
                }
                if block.hdroffs.is_none() {
                    block.hdroffs = Some(block.pos as u32);
                }
                if let Ok((header::HeaderRecord::File(fh), _)) = header::decode(&bytes) {
                    let seqno = finished as u32 + 1;
                    history_q.enqueue(Some(HistoryRecord {
                        saveset_id: saveset_id.to_string(),
                        filename: fh.name,
                        seqno,
                        timestamp_ns: now_ns(),
                    }));
                }
                copy_into_blocks(&bytes, &mut block, block_q, &mut finished);
            }
            ProducerSlot::Data { buf, pooled } => {
                let c = deflate.get_or_insert_with(|| Compress::new(Compression::default(), false));
                deflate_into_blocks(c, &buf, &mut block, block_q, &mut finished);
                if pooled {
                    free_q.enqueue(buf);
                }
            }
            ProducerSlot::End => {
                if let Some(mut c) = deflate.take() {
                    finish_deflate(&mut c, &mut block, block_q, &mut finished);
                }
                break;
            }
        }
    }

    if block.pos > 0 {
        let start = block.pos;
        for b in &mut block.body[start..] {
            *b = 0xFF;
        }
        block_q.enqueue(Some(FilledBlock { body: block.body, hdroffs: block.hdroffs.unwrap_or(0) }));
    }
    block_q.enqueue(None);
    history_q.enqueue(None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn header_only_stream_preserves_hdroffs_zero() {
        let producer_q: Arc<SlotQueue<ProducerSlot>> = Arc::new(SlotQueue::new());
        let free_q: Arc<SlotQueue<Vec<u8>>> = Arc::new(SlotQueue::new());
        let block_q: Arc<SlotQueue<Option<FilledBlock>>> = Arc::new(SlotQueue::new());
        let history_q: Arc<SlotQueue<Option<HistoryRecord>>> = Arc::new(SlotQueue::new());

        let end = header::encode_end_marker(1);
        producer_q.enqueue(ProducerSlot::Header(end));
        producer_q.enqueue(ProducerSlot::End);

        let (pq, fq, bq, hq) = (producer_q.clone(), free_q.clone(), block_q.clone(), history_q.clone());
        let handle = thread::spawn(move || run(&pq, &fq, &bq, &hq, 256, "ss1"));
        handle.join().unwrap();

        let block = block_q.dequeue().unwrap().unwrap();
        assert_eq!(block.hdroffs, 0);
        assert!(block_q.dequeue().is_none());
        assert!(history_q.dequeue().is_none());
    }

    #[test]
    fn data_then_header_sets_nonzero_hdroffs() {
        let producer_q: Arc<SlotQueue<ProducerSlot>> = Arc::new(SlotQueue::new());
        let free_q: Arc<SlotQueue<Vec<u8>>> = Arc::new(SlotQueue::new());
        let block_q: Arc<SlotQueue<Option<FilledBlock>>> = Arc::new(SlotQueue::new());
        let history_q: Arc<SlotQueue<Option<HistoryRecord>>> = Arc::new(SlotQueue::new());

        producer_q.enqueue(ProducerSlot::Data { buf: b"hello world".to_vec(), pooled: false });
        let end = header::encode_end_marker(1);
        producer_q.enqueue(ProducerSlot::Header(end));
        producer_q.enqueue(ProducerSlot::End);

        let (pq, fq, bq, hq) = (producer_q.clone(), free_q.clone(), block_q.clone(), history_q.clone());
        let handle = thread::spawn(move || run(&pq, &fq, &bq, &hq, 4096, "ss1"));
        handle.join().unwrap();

        let block = block_q.dequeue().unwrap().unwrap();
        assert!(block.hdroffs > 0);
    }
}
