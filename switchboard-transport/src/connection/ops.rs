//! Per-connection operation tables.
//!
//! Two mappings per connection: outbound operations (our calls awaiting the
//! peer's response) and inbound operations (the peer's calls we are
//! serving), both keyed by frame id. The tables own the deadline
//! bookkeeping: every sweep pass expires operations past their deadline,
//! and `last_timeout_time` distinguishes "some operations timed out" from
//! "nothing has arrived since the last timeout" (which escalates to socket
//! destruction).

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::CallError;
use crate::rpc::CallResponseArgs;

/// Completion result delivered to an outbound caller.
pub(crate) type CallResult = Result<CallResponseArgs, CallError>;

/// State of one outbound operation.
pub(crate) struct OutboundOp {
    /// When the request frame was sent.
    pub start: Duration,
    /// Per-operation deadline; the channel default applies when `None`.
    pub timeout: Option<Duration>,
    /// The caller's continuation. Fired exactly once: response, timeout,
    /// or reset.
    pub complete: Option<oneshot::Sender<CallResult>>,
    /// Set when a sweep expired this operation.
    pub timed_out: bool,
}

impl OutboundOp {
    pub(crate) fn fire(&mut self, result: CallResult) {
        if let Some(tx) = self.complete.take() {
            // The caller may have dropped its receiver; nothing to do then.
            let _ = tx.send(result);
        }
    }
}

/// State of one inbound operation.
pub(crate) struct InboundOp {
    /// When the request frame was received.
    pub start: Duration,
    /// Guard against duplicate responses.
    pub response_sent: bool,
}

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SweepVerdict {
    /// Tables were swept; the connection stays up.
    Swept,
    /// The previous sweep already observed a timeout and no frame has
    /// arrived since: every operation is timing out, destroy the socket.
    DestroySocket,
}

/// Counters from one sweep pass, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SweepReport {
    /// How the sweep ended.
    pub verdict: SweepVerdict,
    /// Outbound operations expired this pass.
    pub expired_out: usize,
    /// Inbound operations expired this pass.
    pub expired_in: usize,
    /// Already-timed-out outbound entries found lingering in the table.
    pub stale_out: usize,
}

impl Default for SweepReport {
    fn default() -> Self {
        Self {
            verdict: SweepVerdict::Swept,
            expired_out: 0,
            expired_in: 0,
            stale_out: 0,
        }
    }
}

/// The two operation tables plus their pending counters.
///
/// Counters always equal the table sizes between frame events; the
/// debug assertions below check that invariant on every mutation.
pub(crate) struct OpTables {
    out_ops: HashMap<u32, OutboundOp>,
    in_ops: HashMap<u32, InboundOp>,
    out_pending: usize,
    in_pending: usize,
    /// Time of the most recent outbound-op timeout, or zero when a frame
    /// has arrived since.
    last_timeout_time: Duration,
}

impl OpTables {
    pub(crate) fn new() -> Self {
        Self {
            out_ops: HashMap::new(),
            in_ops: HashMap::new(),
            out_pending: 0,
            in_pending: 0,
            last_timeout_time: Duration::ZERO,
        }
    }

    pub(crate) fn out_pending(&self) -> usize {
        self.out_pending
    }

    pub(crate) fn in_pending(&self) -> usize {
        self.in_pending
    }

    pub(crate) fn last_timeout_time(&self) -> Duration {
        self.last_timeout_time
    }

    /// A whole frame arrived: the peer is alive.
    pub(crate) fn mark_frame_received(&mut self) {
        self.last_timeout_time = Duration::ZERO;
    }

    pub(crate) fn contains_out(&self, id: u32) -> bool {
        self.out_ops.contains_key(&id)
    }

    pub(crate) fn insert_out(&mut self, id: u32, op: OutboundOp) {
        let replaced = self.out_ops.insert(id, op);
        debug_assert!(replaced.is_none(), "outbound op id reuse");
        self.out_pending += 1;
        self.check_counters();
    }

    pub(crate) fn remove_out(&mut self, id: u32) -> Option<OutboundOp> {
        let op = self.out_ops.remove(&id)?;
        self.out_pending -= 1;
        self.check_counters();
        Some(op)
    }

    /// Insert an inbound op, returning true when an entry under this id was
    /// replaced (the peer reused a live id).
    pub(crate) fn insert_in(&mut self, id: u32, op: InboundOp) -> bool {
        let replaced = self.in_ops.insert(id, op).is_some();
        if !replaced {
            self.in_pending += 1;
        }
        self.check_counters();
        replaced
    }

    pub(crate) fn get_in_mut(&mut self, id: u32) -> Option<&mut InboundOp> {
        self.in_ops.get_mut(&id)
    }

    pub(crate) fn remove_in(&mut self, id: u32) -> Option<InboundOp> {
        let op = self.in_ops.remove(&id)?;
        self.in_pending -= 1;
        self.check_counters();
        Some(op)
    }

    /// Sweep both tables against `now`.
    ///
    /// If the previous sweep recorded a timeout and no frame has arrived
    /// since, the verdict is `DestroySocket` and the tables are left
    /// untouched (the reset path drains them). Otherwise expired outbound
    /// operations fire their continuations with a timeout error and
    /// expired inbound operations are dropped silently; the peer times out
    /// symmetrically on its side.
    pub(crate) fn sweep_at(
        &mut self,
        now: Duration,
        req_timeout_default: Duration,
        server_timeout_default: Duration,
    ) -> SweepReport {
        if self.last_timeout_time != Duration::ZERO {
            return SweepReport {
                verdict: SweepVerdict::DestroySocket,
                ..SweepReport::default()
            };
        }

        let mut report = SweepReport::default();

        let stale: Vec<u32> = self
            .out_ops
            .iter()
            .filter(|(_, op)| op.timed_out)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            self.remove_out(id);
            report.stale_out += 1;
        }

        let expired_out: Vec<u32> = self
            .out_ops
            .iter()
            .filter(|(_, op)| {
                let timeout = op.timeout.unwrap_or(req_timeout_default);
                now.saturating_sub(op.start) > timeout
            })
            .map(|(id, _)| *id)
            .collect();
        for id in expired_out {
            if let Some(mut op) = self.remove_out(id) {
                op.timed_out = true;
                op.fire(Err(CallError::Timeout));
                self.last_timeout_time = now;
                report.expired_out += 1;
            }
        }

        let expired_in: Vec<u32> = self
            .in_ops
            .iter()
            .filter(|(_, op)| now.saturating_sub(op.start) > server_timeout_default)
            .map(|(id, _)| *id)
            .collect();
        for id in expired_in {
            self.remove_in(id);
            report.expired_in += 1;
        }

        report
    }

    /// Drain both tables exactly once, failing every outbound caller with
    /// the triggering error. Returns the number of outbound continuations
    /// fired.
    pub(crate) fn drain_all(&mut self, error: &CallError) -> usize {
        let mut fired = 0;
        for (_, mut op) in self.out_ops.drain() {
            op.fire(Err(error.clone()));
            fired += 1;
        }
        self.in_ops.clear();
        self.out_pending = 0;
        self.in_pending = 0;
        fired
    }

    fn check_counters(&self) {
        debug_assert_eq!(self.out_pending, self.out_ops.len());
        debug_assert_eq!(self.in_pending, self.in_ops.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQ_DEFAULT: Duration = Duration::from_millis(5000);
    const SERVER_DEFAULT: Duration = Duration::from_millis(5000);

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn out_op(
        start: Duration,
        timeout: Option<Duration>,
    ) -> (OutboundOp, oneshot::Receiver<CallResult>) {
        let (tx, rx) = oneshot::channel();
        (
            OutboundOp {
                start,
                timeout,
                complete: Some(tx),
                timed_out: false,
            },
            rx,
        )
    }

    #[test]
    fn test_counters_track_table_sizes() {
        let mut ops = OpTables::new();
        let (op, _rx) = out_op(ms(0), None);
        ops.insert_out(1, op);
        ops.insert_in(
            7,
            InboundOp {
                start: ms(0),
                response_sent: false,
            },
        );
        assert_eq!(ops.out_pending(), 1);
        assert_eq!(ops.in_pending(), 1);

        ops.remove_out(1);
        ops.remove_in(7);
        assert_eq!(ops.out_pending(), 0);
        assert_eq!(ops.in_pending(), 0);
    }

    #[test]
    fn test_per_op_timeout_expires_at_first_crossing_sweep() {
        let mut ops = OpTables::new();
        // Call issued at t=0 with a 100ms deadline; first sweep at t=1000.
        let (op, mut rx) = out_op(ms(0), Some(ms(100)));
        ops.insert_out(1, op);

        let report = ops.sweep_at(ms(1000), REQ_DEFAULT, SERVER_DEFAULT);
        assert_eq!(report.verdict, SweepVerdict::Swept);
        assert_eq!(report.expired_out, 1);
        assert_eq!(ops.out_pending(), 0);
        assert_eq!(ops.last_timeout_time(), ms(1000));

        let result = rx.try_recv().expect("continuation fired");
        assert!(matches!(result, Err(CallError::Timeout)));
    }

    #[test]
    fn test_default_timeout_applies_when_unset() {
        let mut ops = OpTables::new();
        let (op, mut rx) = out_op(ms(0), None);
        ops.insert_out(1, op);

        // Inside the 5000ms default: stays pending.
        let report = ops.sweep_at(ms(4000), REQ_DEFAULT, SERVER_DEFAULT);
        assert_eq!(report.expired_out, 0);
        assert_eq!(ops.out_pending(), 1);
        assert!(rx.try_recv().is_err());

        // Past the default: expires.
        let report = ops.sweep_at(ms(5001), REQ_DEFAULT, SERVER_DEFAULT);
        assert_eq!(report.expired_out, 1);
        assert!(matches!(
            rx.try_recv().expect("fired"),
            Err(CallError::Timeout)
        ));
    }

    #[test]
    fn test_deadline_is_exclusive() {
        let mut ops = OpTables::new();
        let (op, _rx) = out_op(ms(0), Some(ms(100)));
        ops.insert_out(1, op);

        // now - start == timeout does not expire; only strictly greater does.
        let report = ops.sweep_at(ms(100), REQ_DEFAULT, SERVER_DEFAULT);
        assert_eq!(report.expired_out, 0);
        assert_eq!(ops.out_pending(), 1);
    }

    #[test]
    fn test_second_sweep_without_frames_destroys_socket() {
        let mut ops = OpTables::new();
        let (op, _rx) = out_op(ms(0), Some(ms(100)));
        ops.insert_out(1, op);

        let first = ops.sweep_at(ms(1000), REQ_DEFAULT, SERVER_DEFAULT);
        assert_eq!(first.verdict, SweepVerdict::Swept);

        let second = ops.sweep_at(ms(2000), REQ_DEFAULT, SERVER_DEFAULT);
        assert_eq!(second.verdict, SweepVerdict::DestroySocket);
    }

    #[test]
    fn test_frame_arrival_clears_timeout_escalation() {
        let mut ops = OpTables::new();
        let (op, _rx) = out_op(ms(0), Some(ms(100)));
        ops.insert_out(1, op);

        ops.sweep_at(ms(1000), REQ_DEFAULT, SERVER_DEFAULT);
        assert_eq!(ops.last_timeout_time(), ms(1000));

        // A successful frame proves the peer alive; next sweep is normal.
        ops.mark_frame_received();
        let report = ops.sweep_at(ms(2000), REQ_DEFAULT, SERVER_DEFAULT);
        assert_eq!(report.verdict, SweepVerdict::Swept);
    }

    #[test]
    fn test_inbound_expiry_is_silent() {
        let mut ops = OpTables::new();
        ops.insert_in(
            9,
            InboundOp {
                start: ms(0),
                response_sent: false,
            },
        );

        let report = ops.sweep_at(ms(5001), REQ_DEFAULT, SERVER_DEFAULT);
        assert_eq!(report.expired_in, 1);
        assert_eq!(ops.in_pending(), 0);
        // Inbound expiry never drives socket destruction on its own.
        assert_eq!(ops.last_timeout_time(), Duration::ZERO);
    }

    #[test]
    fn test_stale_timed_out_entry_removed() {
        let mut ops = OpTables::new();
        let (mut op, _rx) = out_op(ms(0), Some(ms(100)));
        op.timed_out = true;
        ops.insert_out(1, op);

        let report = ops.sweep_at(ms(50), REQ_DEFAULT, SERVER_DEFAULT);
        assert_eq!(report.stale_out, 1);
        assert_eq!(report.expired_out, 0);
        assert_eq!(ops.out_pending(), 0);
    }

    #[test]
    fn test_drain_all_fires_each_continuation_once() {
        let mut ops = OpTables::new();
        let (op_a, mut rx_a) = out_op(ms(0), None);
        let (op_b, mut rx_b) = out_op(ms(10), None);
        ops.insert_out(1, op_a);
        ops.insert_out(2, op_b);
        ops.insert_in(
            3,
            InboundOp {
                start: ms(0),
                response_sent: false,
            },
        );

        let fired = ops.drain_all(&CallError::Shutdown);
        assert_eq!(fired, 2);
        assert_eq!(ops.out_pending(), 0);
        assert_eq!(ops.in_pending(), 0);

        assert!(matches!(
            rx_a.try_recv().expect("fired"),
            Err(CallError::Shutdown)
        ));
        assert!(matches!(
            rx_b.try_recv().expect("fired"),
            Err(CallError::Shutdown)
        ));

        // Second drain has nothing left to fire.
        assert_eq!(ops.drain_all(&CallError::Shutdown), 0);
    }

    #[test]
    fn test_completion_after_removal_is_impossible() {
        let mut ops = OpTables::new();
        let (op, mut rx) = out_op(ms(0), None);
        ops.insert_out(1, op);

        let mut op = ops.remove_out(1).expect("present");
        op.fire(Ok(CallResponseArgs {
            arg1: b"a".to_vec(),
            arg2: b"b".to_vec(),
        }));
        // A second fire is a no-op: the sender was consumed.
        op.fire(Err(CallError::Timeout));

        let result = rx.try_recv().expect("fired once");
        assert!(result.is_ok());
    }

    #[test]
    fn test_inbound_id_reuse_reports_replacement() {
        let mut ops = OpTables::new();
        assert!(!ops.insert_in(
            4,
            InboundOp {
                start: ms(0),
                response_sent: false,
            },
        ));
        assert!(ops.insert_in(
            4,
            InboundOp {
                start: ms(5),
                response_sent: false,
            },
        ));
        assert_eq!(ops.in_pending(), 1);
    }
}
