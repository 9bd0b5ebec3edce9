//! Entry bodies: single-use sources that can be forked for [`EntrySnapshot::body`].
//!
//! A stream body is read exactly once from its source. Every reader of it is a branch of a
//! shared tee: bytes pulled from the source by one branch are queued for the others. The queue
//! of a branch that is not being read grows without bound, so a snapshot body that is forked
//! and then left unread while the archive is serialized holds the whole remaining stream in
//! memory. Dropping the branch releases its queue.
//!
//! [`EntrySnapshot::body`]: crate::EntrySnapshot::body

use std::{
    collections::VecDeque,
    io,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{ready, Context, Poll, Waker},
};

use tokio::io::{AsyncRead, ReadBuf};

use crate::error::ArchiveError;

const CHUNK_SIZE: usize = 8192;

type DynReader = Box<dyn AsyncRead + Send + Unpin>;

/// The body held by an archive entry.
pub(crate) enum Body {
    Empty,
    Bytes(Arc<[u8]>),
    Stream(TeeBranch),
    /// Taken by `serialize`.
    Consumed,
}

impl Body {
    pub(crate) fn from_reader(reader: DynReader, size: u64) -> Self {
        Body::Stream(TeeBranch::new(Box::new(ExactReader::new(reader, size))))
    }

    pub(crate) fn bytes(bytes: Vec<u8>) -> Self {
        if bytes.is_empty() {
            Body::Empty
        } else {
            Body::Bytes(bytes.into())
        }
    }

    /// A new reader over the same bytes, leaving `self` readable.
    fn fork(&self) -> Option<DynReader> {
        match self {
            Body::Empty => Some(Box::new(tokio::io::empty())),
            Body::Bytes(bytes) => Some(Box::new(io::Cursor::new(Arc::clone(bytes)))),
            Body::Stream(branch) => Some(Box::new(branch.fork())),
            Body::Consumed => None,
        }
    }

    /// Turn the body into its reader. `Consumed` yields `None`.
    pub(crate) fn into_reader(self) -> Option<DynReader> {
        match self {
            Body::Empty => Some(Box::new(tokio::io::empty())),
            Body::Bytes(bytes) => Some(Box::new(io::Cursor::new(bytes))),
            Body::Stream(branch) => Some(Box::new(branch)),
            Body::Consumed => None,
        }
    }
}

/// Shared, lockable body slot of an entry.
#[derive(Clone)]
pub(crate) struct BodySlot(Arc<Mutex<Body>>);

impl BodySlot {
    pub(crate) fn new(body: Body) -> Self {
        Self(Arc::new(Mutex::new(body)))
    }

    fn lock(&self) -> MutexGuard<'_, Body> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn take(&self) -> Body {
        std::mem::replace(&mut *self.lock(), Body::Consumed)
    }

    /// Buffered bytes, if the body is in memory.
    pub(crate) fn bytes(&self) -> Option<Arc<[u8]>> {
        match &*self.lock() {
            Body::Bytes(bytes) => Some(Arc::clone(bytes)),
            Body::Empty => Some(Arc::from(&[][..])),
            _ => None,
        }
    }
}

/// The body of a retrieved entry.
///
/// Nothing is forked until the first read, so an unread `EntryBody` costs nothing.
/// Reading fails with [`ArchiveError::BodyConsumed`] if the archive was serialized first.
pub struct EntryBody {
    state: EntryBodyState,
}

enum EntryBodyState {
    Pending { slot: BodySlot, path: String },
    Reading(DynReader),
}

impl EntryBody {
    pub(crate) fn new(slot: BodySlot, path: String) -> Self {
        Self {
            state: EntryBodyState::Pending { slot, path },
        }
    }
}

impl AsyncRead for EntryBody {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let EntryBodyState::Pending { slot, path } = &self.state {
            let reader = slot
                .lock()
                .fork()
                .ok_or_else(|| ArchiveError::BodyConsumed(path.clone()))?;
            self.state = EntryBodyState::Reading(reader);
        }
        match &mut self.state {
            EntryBodyState::Reading(reader) => Pin::new(reader).poll_read(cx, buf),
            EntryBodyState::Pending { .. } => unreachable!("state set above"),
        }
    }
}

struct TeeState {
    source: DynReader,
    /// Pending bytes per branch; `None` once the branch is dropped.
    queues: Vec<Option<VecDeque<u8>>>,
    /// Branches waiting for someone else's read of the source.
    waiters: Vec<Option<Waker>>,
    eof: bool,
    failed: Option<(io::ErrorKind, String)>,
}

impl TeeState {
    fn wake_others(&mut self, id: usize) {
        for (i, waker) in self.waiters.iter_mut().enumerate() {
            if i != id {
                if let Some(waker) = waker.take() {
                    waker.wake();
                }
            }
        }
    }
}

/// One reader of a shared single-pass source.
pub(crate) struct TeeBranch {
    id: usize,
    shared: Arc<Mutex<TeeState>>,
}

impl TeeBranch {
    fn new(source: DynReader) -> Self {
        let state = TeeState {
            source,
            queues: vec![Some(VecDeque::new())],
            waiters: vec![None],
            eof: false,
            failed: None,
        };
        Self {
            id: 0,
            shared: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TeeState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A new branch that will see everything this branch has not read yet.
    pub(crate) fn fork(&self) -> TeeBranch {
        let mut state = self.lock();
        let queue = state.queues[self.id].clone();
        state.queues.push(queue);
        state.waiters.push(None);
        TeeBranch {
            id: state.queues.len() - 1,
            shared: Arc::clone(&self.shared),
        }
    }
}

impl AsyncRead for TeeBranch {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let id = self.id;
        let mut guard = self.lock();
        let state = &mut *guard;

        if let Some(queue) = state.queues[id].as_mut().filter(|q| !q.is_empty()) {
            let n = queue.len().min(buf.remaining());
            let (front, back) = queue.as_slices();
            let from_front = n.min(front.len());
            buf.put_slice(&front[..from_front]);
            buf.put_slice(&back[..n - from_front]);
            queue.drain(..n);
            return Poll::Ready(Ok(()));
        }
        if let Some((kind, msg)) = &state.failed {
            return Poll::Ready(Err(io::Error::new(*kind, msg.clone())));
        }
        if state.eof {
            return Poll::Ready(Ok(()));
        }

        let mut chunk = [0u8; CHUNK_SIZE];
        let mut chunk_buf = ReadBuf::new(&mut chunk);
        let polled = Pin::new(&mut state.source).poll_read(cx, &mut chunk_buf);
        if polled.is_pending() {
            state.waiters[id] = Some(cx.waker().clone());
        }
        if let Err(e) = ready!(polled) {
            state.failed = Some((e.kind(), e.to_string()));
            state.wake_others(id);
            return Poll::Ready(Err(e));
        }

        let data = chunk_buf.filled();
        if data.is_empty() {
            state.eof = true;
        } else {
            for (i, queue) in state.queues.iter_mut().enumerate() {
                if let Some(queue) = queue {
                    if i == id {
                        let n = data.len().min(buf.remaining());
                        buf.put_slice(&data[..n]);
                        queue.extend(&data[n..]);
                    } else {
                        queue.extend(data);
                    }
                }
            }
        }
        state.wake_others(id);
        Poll::Ready(Ok(()))
    }
}

impl Drop for TeeBranch {
    fn drop(&mut self) {
        let id = self.id;
        let mut state = self.lock();
        state.queues[id] = None;
        state.waiters[id] = None;
        // whoever was waiting on this branch's read has to poll the source itself now
        state.wake_others(id);
    }
}

/// Yields exactly `size` bytes of `inner`.
///
/// Extra bytes are ignored; a source that ends early fails with `UnexpectedEof`.
pub(crate) struct ExactReader<R> {
    inner: R,
    remaining: u64,
}

impl<R> ExactReader<R> {
    pub(crate) fn new(inner: R, size: u64) -> Self {
        Self {
            inner,
            remaining: size,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ExactReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.remaining == 0 || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        let mut chunk = [0u8; CHUNK_SIZE];
        let limit = usize::try_from(self.remaining)
            .unwrap_or(usize::MAX)
            .min(buf.remaining())
            .min(CHUNK_SIZE);
        let mut chunk_buf = ReadBuf::new(&mut chunk[..limit]);
        ready!(Pin::new(&mut self.inner).poll_read(cx, &mut chunk_buf))?;

        let data = chunk_buf.filled();
        if data.is_empty() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("body ended {} bytes short", self.remaining),
            )));
        }
        buf.put_slice(data);
        self.remaining -= data.len() as u64;
        Poll::Ready(Ok(()))
    }
}
