//! Bookkeeping for a single `run_jobs` call.
//!
//! A session fans its batch out into the pool's shared queue and fans the
//! outcomes back in through a private channel. It returns on the first hit or
//! error. Jobs still in flight at that point are abandoned: they keep running
//! and deposit into the channel nobody reads any more, which never blocks
//! because the channel holds one slot per job.

use super::{
    errors::PoolError,
    job::{Job, Outcome, Sink},
    pool::Pool,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;


pub(crate) struct CallSession<'a, T, E> {
    pool: &'a Pool,
    sink: Sink<T, E>,
    results: mpsc::Receiver<Outcome<T, E>>,
    outstanding: usize,
}

impl<'a, T, E> CallSession<'a, T, E>
where
    T: Send + 'static,
    E: From<PoolError> + Send + 'static,
{
    /// Runs a whole call: admission, fan-out, then fan-in.
    ///
    /// `make_job` binds one payload to the session's sink.
    pub(crate) async fn run<P, J>(
        pool: &'a Pool,
        payloads: Vec<P>,
        mut make_job: J,
        cancel: &CancellationToken,
    ) -> Outcome<T, E>
    where
        J: FnMut(P, Sink<T, E>) -> Job,
    {
        if pool.is_closed() {
            return Err(E::from(PoolError::Closed));
        }
        if payloads.is_empty() {
            return Ok(None);
        }

        // Refuse up front when the batch cannot fit, rather than half-submit it.
        pool.ensure_room(payloads.len())?;

        let mut session = Self::open(pool, payloads.len());
        for payload in payloads {
            let job = make_job(payload, session.sink.clone());
            // Already-submitted jobs are left to run; their outcomes land in
            // the buffered channel and are dropped with it.
            session.submit(job)?;
        }

        session.collect(cancel).await
    }

    fn open(pool: &'a Pool, batch_len: usize) -> Self {
        let (sink, results) = mpsc::channel(batch_len.max(1));
        Self {
            pool,
            sink,
            results,
            outstanding: 0,
        }
    }

    #[inline]
    fn submit(&mut self, job: Job) -> Result<(), PoolError> {
        self.pool.submit(job)?;
        self.outstanding += 1;
        Ok(())
    }

    async fn collect(self, cancel: &CancellationToken) -> Outcome<T, E> {
        let Self {
            sink,
            mut results,
            mut outstanding,
            ..
        } = self;
        // Only jobs hold senders from here on; if they all vanish, recv ends.
        drop(sink);

        while outstanding > 0 {
            let outcome = tokio::select! {
                biased;
                outcome = results.recv() => outcome,
                _ = cancel.cancelled() => {
                    tracing::trace!(outstanding, "call cancelled");
                    return Err(E::from(PoolError::Cancelled));
                }
            };

            match outcome {
                Some(Ok(None)) => outstanding -= 1,
                Some(decisive) => {
                    tracing::trace!(abandoned = outstanding - 1, "call short-circuited");
                    return decisive;
                }
                None => return Err(E::from(PoolError::ChannelClosed)),
            }
        }

        tracing::trace!("call finished without a hit");
        Ok(None)
    }
}
