//! Turns a raw byte stream into record-aligned chunks.
//!
//! Every raw block of `n` bytes is cut at its first and last newline:
//!
//! ```text
//! [0, start)    leading fragment, the terminated tail of a record from the previous block
//! [start, end)  body, only whole records, emitted straight away as a chunk
//! [end, n)      trailing fragment, the unterminated head of a record that continues
//! ```
//!
//! Fragments are appended, strictly in read order, to a [`Fragments`] log. The trailing fragment
//! of block `k` followed by the leading fragment of block `k + 1` is exactly one record, so once
//! the stream ends the whole log is itself a record-aligned chunk.

use std::io::Read;

use crossbeam::channel::Receiver;
use log::debug;

use crate::error::{Error, Result};

/// A record-aligned slice of the input: starts at a record boundary and ends with `\n`.
///
/// Body chunks borrow their bytes from the raw read buffer so the buffer can be handed back to the
/// reader once the chunk is parsed.
#[derive(Debug)]
pub struct Chunk {
    data: Box<[u8]>,
    start: usize,
    end: usize,
}

impl Chunk {
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn into_buffer(self) -> Box<[u8]> {
        self.data
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(v: Vec<u8>) -> Self {
        let end = v.len();
        Self {
            data: v.into_boxed_slice(),
            start: 0,
            end,
        }
    }
}

/// Append-only log of block fragments, indexed by the sequence number of the block they came from.
///
/// Stitching is only correct if fragments land here in the exact order their blocks were read, so
/// `push` takes the block's sequence number. Only [`Chunker`] hands those out, one per block.
#[derive(Debug, Default)]
pub struct Fragments {
    buf: Vec<u8>,
    // starts[seq] is where block `seq`'s fragments begin in `buf`
    starts: Vec<usize>,
}

impl Fragments {
    pub fn push(&mut self, seq: u64, leading: &[u8], trailing: &[u8]) {
        debug_assert_eq!(
            seq,
            self.starts.len() as u64,
            "fragments must be appended in block read order"
        );
        self.starts.push(self.buf.len());
        self.buf.extend_from_slice(leading);
        self.buf.extend_from_slice(trailing);
    }

    pub(crate) fn blocks(&self) -> usize {
        self.starts.len()
    }

    #[cfg(test)]
    fn of_block(&self, seq: usize) -> Option<&[u8]> {
        let start = *self.starts.get(seq)?;
        let end = self.starts.get(seq + 1).copied().unwrap_or(self.buf.len());
        Some(&self.buf[start..end])
    }

    // the whole log as the final chunk. it has to end in a newline, otherwise the input's last
    // record was never terminated.
    pub fn finish(self) -> Result<Option<Chunk>> {
        match self.buf.last() {
            None => Ok(None),
            Some(b'\n') => Ok(Some(Chunk::from(self.buf))),
            Some(_) => {
                let tail = memchr::memrchr(b'\n', &self.buf).map_or(0, |p| p + 1);
                Err(Error::MissingTrailingNewline {
                    record: String::from_utf8_lossy(&self.buf[tail..]).into_owned(),
                })
            }
        }
    }
}

/// Reads fixed-size raw blocks from `input` and hands out record-aligned chunks: one body chunk
/// per block (when it has any whole records), then the stitched fragments as the last chunk.
pub struct Chunker<R> {
    input: R,
    block_size: usize,
    seq: u64,
    offset: u64,
    fragments: Option<Fragments>,
    pool: Option<Receiver<Box<[u8]>>>,
    spare: Option<Box<[u8]>>,
    allocs: usize,
}

impl<R: Read> Chunker<R> {
    pub fn new(input: R, block_size: usize) -> Self {
        Self {
            input,
            block_size,
            seq: 0,
            offset: 0,
            fragments: Some(Fragments::default()),
            pool: None,
            spare: None,
            allocs: 0,
        }
    }

    pub fn with_pool(mut self, pool: Receiver<Box<[u8]>>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn blocks_read(&self) -> u64 {
        self.seq
    }

    pub fn bytes_read(&self) -> u64 {
        self.offset
    }

    // fresh block buffers, i.e. ones the pool couldn't supply
    pub fn allocations(&self) -> usize {
        self.allocs
    }

    fn take_buffer(&mut self) -> Box<[u8]> {
        if let Some(buf) = self.spare.take() {
            return buf;
        }
        if let Some(pool) = &self.pool {
            // the final fragment chunk comes back too, but it isn't block sized
            while let Ok(buf) = pool.try_recv() {
                if buf.len() == self.block_size {
                    return buf;
                }
            }
        }
        self.allocs += 1;
        vec![0u8; self.block_size].into_boxed_slice()
    }

    // a single read() can come back short, so keep going until the block is full or we hit EOF
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.input.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    pub fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        loop {
            let Some(fragments) = self.fragments.as_ref() else {
                return Ok(None);
            };
            debug_assert_eq!(fragments.blocks() as u64, self.seq);

            let mut buf = self.take_buffer();
            let read = match self.fill(&mut buf) {
                Ok(read) => read,
                Err(e) => {
                    self.fragments = None;
                    return Err(e);
                }
            };
            if read == 0 {
                self.spare = Some(buf);
                let Some(fragments) = self.fragments.take() else {
                    return Ok(None);
                };
                debug!(
                    "reached end of input after {} blocks, {} fragment bytes",
                    self.seq,
                    fragments.buf.len()
                );
                return fragments.finish();
            }

            let block = &buf[..read];
            let (start, end) = match (memchr::memchr(b'\n', block), memchr::memrchr(b'\n', block)) {
                (Some(first), Some(last)) => (first + 1, last + 1),
                _ => {
                    self.fragments = None;
                    return Err(Error::NoNewlineInBlock {
                        offset: self.offset,
                        len: read,
                    });
                }
            };

            if let Some(fragments) = self.fragments.as_mut() {
                fragments.push(self.seq, &block[..start], &block[end..]);
            }
            self.seq += 1;
            self.offset += read as u64;

            if start < end {
                return Ok(Some(Chunk {
                    data: buf,
                    start,
                    end,
                }));
            }
            // only one newline in the whole block: nothing to emit but fragments
            self.spare = Some(buf);
        }
    }
}

impl<R: Read> Iterator for Chunker<R> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chunks(input: &[u8], block_size: usize) -> Result<Vec<Vec<u8>>> {
        Chunker::new(input, block_size)
            .map(|c| c.map(|c| c.as_bytes().to_vec()))
            .collect()
    }

    fn sorted_records(chunks: &[Vec<u8>]) -> Vec<Vec<u8>> {
        let mut out = chunks
            .iter()
            .flat_map(|c| c.split_inclusive(|&b| b == b'\n'))
            .map(|r| r.to_vec())
            .collect::<Vec<_>>();
        out.sort();
        out
    }

    #[test]
    fn test_block_bigger_than_input() {
        let input = b"A;1.0\nB;2.0\nC;3.0\n";
        let out = chunks(input, 1 << 16).unwrap();
        // first record is the leading fragment, the rest is the body
        assert_eq!(out, vec![b"B;2.0\nC;3.0\n".to_vec(), b"A;1.0\n".to_vec()]);
    }

    #[test]
    fn test_boundary_record_is_stitched() {
        //             block 0   | block 1
        let input = b"A;1.0\nBB;2.0\nC;3.0\n";
        let out = chunks(input, 10).unwrap();
        // block 0 "A;1.0\nBB;2" has a single newline so it's all fragments. block 1 ".0\nC;3.0\n"
        // has a body, and its leading ".0\n" finishes "BB;2" in the fragment log.
        assert_eq!(
            out,
            vec![b"C;3.0\n".to_vec(), b"A;1.0\nBB;2.0\n".to_vec()]
        );
    }

    #[test]
    fn test_every_chunk_is_record_aligned() {
        let input = b"Sacramento;10.0\nSan Francisco;20.0\nSacramento;5.0\nA;-3.5\nA;3.5\n";
        for block_size in 19..80 {
            for chunk in chunks(input, block_size).unwrap() {
                assert_eq!(chunk.last(), Some(&b'\n'), "block size {block_size}");
            }
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(chunks(b"", 8).unwrap().is_empty());
    }

    #[test]
    fn test_missing_trailing_newline() {
        match chunks(b"A;1.0\nB;2.0", 64) {
            Err(Error::MissingTrailingNewline { record }) => assert_eq!(record, "B;2.0"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_record_longer_than_block() {
        match chunks(b"A;1.0\nLongLongLongName;2.0\n", 8) {
            Err(Error::NoNewlineInBlock { offset, len }) => {
                assert_eq!(offset, 8);
                assert_eq!(len, 8);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_iteration_stops_after_error() {
        let mut chunker = Chunker::new(&b"nonewlinehere"[..], 4);
        assert!(chunker.next().unwrap().is_err());
        assert!(chunker.next().is_none());
    }

    #[test]
    fn test_fragments_are_indexed_by_block() {
        let mut f = Fragments::default();
        f.push(0, b"A;1.0\n", b"B;");
        f.push(1, b"2.0\n", b"");
        assert_eq!(f.blocks(), 2);
        assert_eq!(f.of_block(0), Some(&b"A;1.0\nB;"[..]));
        assert_eq!(f.of_block(1), Some(&b"2.0\n"[..]));
        assert_eq!(f.of_block(2), None);
        let chunk = f.finish().unwrap().unwrap();
        assert_eq!(chunk.as_bytes(), b"A;1.0\nB;2.0\n");
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "block read order")]
    fn test_fragments_reject_out_of_order() {
        let mut f = Fragments::default();
        f.push(1, b"x\n", b"");
    }

    #[test]
    fn test_pool_buffers_are_reused() {
        let (tx, rx) = crossbeam::channel::unbounded();
        let input = b"A;1.0\nB;2.0\nC;3.0\nD;4.0\n";
        let mut chunker = Chunker::new(&input[..], 12).with_pool(rx);
        while let Some(chunk) = chunker.next_chunk().unwrap() {
            assert!(!chunk.is_empty());
            tx.send(chunk.into_buffer()).unwrap();
        }
        assert_eq!(chunker.allocations(), 1);
        assert_eq!(chunker.bytes_read(), input.len() as u64);
    }

    fn record_stream() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(("[a-zA-Z ]{0,12}", -999i32..=999), 1..60).prop_map(|rs| {
            rs.into_iter()
                .map(|(k, v)| {
                    let sign = if v < 0 { "-" } else { "" };
                    format!("{k};{sign}{}.{}\n", v.abs() / 10, v.abs() % 10)
                })
                .collect::<String>()
                .into_bytes()
        })
    }

    proptest! {
        /// Property: any block size at least as long as the longest record yields every record once
        #[test]
        fn prop_round_trip_records(input in record_stream(), extra in 0usize..200) {
            let longest = input
                .split_inclusive(|&b| b == b'\n')
                .map(|r| r.len())
                .max()
                .unwrap_or(1);
            let out = chunks(&input, longest + extra).unwrap();
            prop_assert_eq!(sorted_records(&out), sorted_records(&[input]));
        }
    }
}
