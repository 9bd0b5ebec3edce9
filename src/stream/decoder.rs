//! Push-based archive decoder.
//!
//! [`Decoder`] performs no I/O. Bytes are handed to it with [`Decoder::push`] in chunks of any
//! size, and [`Decoder::next_event`] is polled until it returns `None`, at which point it needs
//! more input. A header split across two chunks and a body ending exactly on a chunk boundary
//! go through the same code path as any other input.

use log::trace;

use crate::{
    entry::{padding_for, EntryDescriptor},
    error::{ArchiveError, Result},
    header::{self, Decoded, Header, BLOCK_SIZE},
};

/// Something the decoder found in the byte stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A member header. Followed by zero or more [`Event::Data`] and one [`Event::EntryEnd`].
    Entry {
        descriptor: EntryDescriptor,
        header: Header,
    },
    /// The next slice of the current entry's body.
    Data(Vec<u8>),
    /// The current entry's body is complete.
    EntryEnd,
    /// The end-of-archive marker was read.
    End,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Expecting a header once `debt` bytes of padding have been skipped.
    Header { debt: u64 },
    /// Inside an entry body.
    Body { remaining: u64, padding: u64 },
    /// A directory header was emitted; its end is still owed.
    SkipBody { debt: u64 },
    /// After the end-of-archive block. Only zero bytes may follow.
    Trailer,
}

/// Incremental decoder over the "remains" buffer.
#[derive(Debug)]
pub struct Decoder {
    remains: Vec<u8>,
    /// Start of unconsumed bytes in `remains`.
    pos: usize,
    state: State,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            remains: Vec::new(),
            pos: 0,
            state: State::Header { debt: 0 },
        }
    }

    /// Append input. After the end-of-archive marker any non-zero byte is rejected.
    pub fn push(&mut self, chunk: &[u8]) -> Result<()> {
        if self.state == State::Trailer {
            return check_trailer(chunk);
        }
        if self.pos > 0 {
            self.remains.drain(..self.pos);
            self.pos = 0;
        }
        self.remains.extend_from_slice(chunk);
        Ok(())
    }

    /// True once the end-of-archive marker has been decoded.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state == State::Trailer
    }

    /// Bytes buffered but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.remains.len() - self.pos
    }

    /// The next event, or `None` if more input is needed.
    pub fn next_event(&mut self) -> Result<Option<Event>> {
        loop {
            match self.state {
                State::Trailer => return Ok(None),
                State::SkipBody { debt } => {
                    self.state = State::Header { debt };
                    return Ok(Some(Event::EntryEnd));
                }
                State::Body {
                    remaining: 0,
                    padding,
                } => {
                    trace!("entry body complete, {padding} bytes of padding owed");
                    self.state = State::Header { debt: padding };
                    return Ok(Some(Event::EntryEnd));
                }
                State::Body { remaining, padding } => {
                    let available = self.buffered();
                    if available == 0 {
                        return Ok(None);
                    }
                    let n = usize::try_from(remaining).map_or(available, |r| r.min(available));
                    let data = self.consume(n).to_vec();
                    self.state = State::Body {
                        remaining: remaining - n as u64,
                        padding,
                    };
                    return Ok(Some(Event::Data(data)));
                }
                State::Header { debt } if debt > 0 => {
                    let n = usize::try_from(debt).map_or(self.buffered(), |d| d.min(self.buffered()));
                    self.consume(n);
                    self.state = State::Header {
                        debt: debt - n as u64,
                    };
                    if debt > n as u64 {
                        return Ok(None);
                    }
                }
                State::Header { .. } => {
                    if self.buffered() < BLOCK_SIZE {
                        return Ok(None);
                    }
                    return self.decode_header().map(Some);
                }
            }
        }
    }

    /// Signal the end of input.
    ///
    /// Succeeds after the end-of-archive marker, or when the input stopped cleanly between
    /// entries. A partial header, an unfinished body or missing padding is corruption.
    pub fn finish(&self) -> Result<()> {
        match self.state {
            State::Trailer => Ok(()),
            State::Header { debt: 0 } if self.buffered() == 0 => Ok(()),
            State::Header { debt: 0 } => Err(ArchiveError::corrupted(format!(
                "archive ends inside a header ({} of {BLOCK_SIZE} bytes)",
                self.buffered()
            ))),
            State::Header { debt } => Err(ArchiveError::corrupted(format!(
                "archive ends {debt} bytes short of the final block boundary"
            ))),
            State::Body { remaining, .. } => Err(ArchiveError::corrupted(format!(
                "archive ends {remaining} bytes before the end of an entry"
            ))),
            State::SkipBody { .. } => Err(ArchiveError::corrupted(
                "archive ends before a directory entry was completed",
            )),
        }
    }

    fn consume(&mut self, n: usize) -> &[u8] {
        let start = self.pos;
        self.pos += n;
        &self.remains[start..self.pos]
    }

    fn decode_header(&mut self) -> Result<Event> {
        let block: &[u8; BLOCK_SIZE] = self.remains[self.pos..self.pos + BLOCK_SIZE]
            .try_into()
            .map_err(|_| ArchiveError::corrupted("short header block"))?;
        let decoded = header::decode(block)?;
        self.pos += BLOCK_SIZE;

        match decoded {
            Decoded::EndOfArchive => {
                trace!("end-of-archive marker");
                let rest = &self.remains[self.pos..];
                check_trailer(rest)?;
                self.remains.clear();
                self.pos = 0;
                self.state = State::Trailer;
                Ok(Event::End)
            }
            Decoded::Entry {
                mut descriptor,
                mut header,
            } => {
                trace!(
                    "header for {:?} ({}, {} bytes)",
                    descriptor.relative_path,
                    descriptor.kind,
                    descriptor.size
                );
                self.state = if descriptor.is_dir() {
                    // directories carry no body; anything declared is skipped
                    let debt = descriptor.size + padding_for(descriptor.size);
                    if descriptor.size != 0 {
                        descriptor.size = 0;
                        header = header::encode(&descriptor)?;
                    }
                    State::SkipBody { debt }
                } else {
                    State::Body {
                        remaining: descriptor.size,
                        padding: padding_for(descriptor.size),
                    }
                };
                Ok(Event::Entry { descriptor, header })
            }
        }
    }
}

fn check_trailer(bytes: &[u8]) -> Result<()> {
    match bytes.iter().position(|&b| b != 0) {
        None => Ok(()),
        Some(offset) => Err(ArchiveError::corrupted(format!(
            "non-zero byte {offset} bytes into data after the end-of-archive marker"
        ))),
    }
}
