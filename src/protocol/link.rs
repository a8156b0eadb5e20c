use std::time::Duration;

use log::{debug, warn};

use crate::protocol::constants::{
    ACK, ENQ, EOT, ETB, ETX, LF, MAX_MESSAGE_SIZE, MAX_RETRIES, NAK, STX,
};
use crate::protocol::encoding::WireEncoding;
use crate::protocol::error::ProtocolError;
use crate::protocol::frame::Frame;
use crate::protocol::message::decode_records;
use crate::protocol::record::FieldValue;

/// Receiver half of the establishment/transfer/termination protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// Awaiting ENQ
    Idle,
    /// Awaiting frames; a chunk buffer is open
    Transfer,
}

/// What the I/O loop must do after feeding bytes to a [`ReceiverSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverAction {
    /// Write this control byte to the peer
    Reply(u8),
    /// A complete message was reassembled and decoded. The caller dispatches
    /// the records and then replies itself: ACK on success, NAK to make the
    /// sender retransmit the message.
    Deliver(Vec<Vec<FieldValue>>),
}

/// Byte-fed receiver state machine with chunked-frame reassembly.
///
/// Owns no I/O: the connection handler reads bytes, feeds them here, and
/// performs the returned actions in order.
#[derive(Debug)]
pub struct ReceiverSession {
    state: ReceiverState,
    /// Wire bytes read but not yet consumed (may hold a partial frame)
    scratch: Vec<u8>,
    /// Reassembled bodies of the in-flight message
    buffer: Vec<u8>,
    /// Sequence number expected on the next chunk, once a message is open
    next_seq: Option<u8>,
    encoding: WireEncoding,
    strict: bool,
}

impl ReceiverSession {
    pub fn new(encoding: WireEncoding, strict: bool) -> Self {
        Self {
            state: ReceiverState::Idle,
            scratch: Vec::new(),
            buffer: Vec::new(),
            next_seq: None,
            encoding,
            strict,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Bytes currently held in the chunk buffer (used by invariant checks).
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drops any partial state and returns to `Idle`. Used on cancellation
    /// and timeout so no buffer outlives its connection.
    pub fn reset(&mut self) {
        self.state = ReceiverState::Idle;
        self.scratch.clear();
        self.buffer.clear();
        self.next_seq = None;
    }

    /// Feed freshly read bytes and collect the resulting actions.
    pub fn on_bytes(&mut self, data: &[u8]) -> Vec<ReceiverAction> {
        self.scratch.extend_from_slice(data);
        let mut actions = Vec::new();

        loop {
            if self.scratch.is_empty() {
                break;
            }
            match self.state {
                ReceiverState::Idle => {
                    let byte = self.scratch.remove(0);
                    if byte == ENQ {
                        debug!("ENQ received, entering transfer state");
                        self.state = ReceiverState::Transfer;
                        self.buffer.clear();
                        self.next_seq = None;
                        actions.push(ReceiverAction::Reply(ACK));
                    } else {
                        debug!("Discarding byte 0x{:02X} while idle", byte);
                    }
                }
                ReceiverState::Transfer => match self.scratch[0] {
                    EOT => {
                        self.scratch.remove(0);
                        if !self.buffer.is_empty() {
                            warn!(
                                "EOT with {} buffered bytes, dropping partial message",
                                self.buffer.len()
                            );
                        }
                        self.buffer.clear();
                        self.next_seq = None;
                        self.state = ReceiverState::Idle;
                        debug!("EOT received, transfer finished");
                    }
                    ENQ => {
                        // Some analyzers resynchronize by repeating ENQ
                        // mid-transfer; refuse it but keep the buffer
                        self.scratch.remove(0);
                        warn!("Spurious ENQ during transfer");
                        actions.push(ReceiverAction::Reply(NAK));
                    }
                    ACK | NAK => {
                        let byte = self.scratch.remove(0);
                        debug!("Out-of-role byte 0x{:02X} during transfer, ignoring", byte);
                    }
                    STX => match self.take_frame() {
                        TakenFrame::Incomplete => break,
                        TakenFrame::Bad => actions.push(ReceiverAction::Reply(NAK)),
                        TakenFrame::Chunk => actions.push(ReceiverAction::Reply(ACK)),
                        TakenFrame::Final => match self.finish_message() {
                            Ok(records) => actions.push(ReceiverAction::Deliver(records)),
                            Err(e) => {
                                warn!("Failed to decode reassembled message: {}", e);
                                actions.push(ReceiverAction::Reply(NAK));
                            }
                        },
                    },
                    other => {
                        self.scratch.remove(0);
                        debug!("Discarding stray byte 0x{:02X} during transfer", other);
                    }
                },
            }
        }

        actions
    }

    /// Locate, consume and validate the frame at the head of the scratch
    /// buffer. The chunk buffer is only touched for a valid frame.
    fn take_frame(&mut self) -> TakenFrame {
        let term_pos = match self
            .scratch
            .iter()
            .position(|&b| b == ETX || b == ETB)
        {
            Some(pos) => pos,
            None => {
                // An unterminated frame cannot be allowed to buffer forever
                if self.scratch.len() > MAX_MESSAGE_SIZE {
                    warn!(
                        "Dropping {} unterminated bytes over the message limit",
                        self.scratch.len()
                    );
                    self.scratch.clear();
                    return TakenFrame::Bad;
                }
                return TakenFrame::Incomplete;
            }
        };
        // Terminator, two checksum bytes, CR, LF
        if self.scratch.len() < term_pos + 5 {
            return TakenFrame::Incomplete;
        }

        let mut end = term_pos + 5;
        if self.scratch.get(end - 1) != Some(&LF) {
            // Tolerate a missing LF by ending at the CR
            end -= 1;
        }
        let frame_bytes: Vec<u8> = self.scratch.drain(..end).collect();

        let frame = match Frame::parse(&frame_bytes, true) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Rejecting invalid frame: {}", e);
                return TakenFrame::Bad;
            }
        };

        if let Some(expected) = self.next_seq {
            if frame.sequence != expected {
                warn!(
                    "Rejecting frame with sequence {}, expected {}",
                    frame.sequence, expected
                );
                return TakenFrame::Bad;
            }
        }

        self.buffer.extend_from_slice(&frame.body);
        if frame.is_last {
            TakenFrame::Final
        } else {
            self.next_seq = Some((frame.sequence + 1) % 8);
            TakenFrame::Chunk
        }
    }

    fn finish_message(&mut self) -> Result<Vec<Vec<FieldValue>>, ProtocolError> {
        let body = std::mem::take(&mut self.buffer);
        self.next_seq = None;
        decode_records(&body, self.encoding, self.strict)
    }
}

enum TakenFrame {
    Incomplete,
    Bad,
    Chunk,
    Final,
}

/// Sender half of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    /// ENQ written, awaiting ACK
    Establishing,
    /// Transmitting frames, one unacknowledged frame at a time
    Sending,
    /// All frames acknowledged, EOT pending
    Closing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SenderAction {
    /// Write these bytes to the peer
    Write(Vec<u8>),
    /// Every frame of every message was acknowledged and EOT was written
    Finished,
    /// The transfer failed; EOT was written and the session is idle again
    Abort(SenderFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderFailure {
    /// Peer never accepted the session (NAK on ENQ)
    NotAccepted { attempts: u32 },
    /// Peer kept rejecting a frame
    Rejected { attempts: u32 },
    /// Peer stopped answering
    Timeout(Duration),
}

impl From<SenderFailure> for ProtocolError {
    fn from(failure: SenderFailure) -> Self {
        match failure {
            SenderFailure::NotAccepted { attempts } => ProtocolError::NotAccepted { attempts },
            SenderFailure::Rejected { attempts } => ProtocolError::Rejected { attempts },
            SenderFailure::Timeout(after) => ProtocolError::Timeout(after),
        }
    }
}

/// Frame-by-frame sender state machine.
///
/// Holds the pre-encoded frames of each logical message and never advances
/// past a frame the peer has not acknowledged.
#[derive(Debug)]
pub struct SenderSession {
    state: SenderState,
    messages: Vec<Vec<Vec<u8>>>,
    msg_idx: usize,
    frame_idx: usize,
    enq_attempts: u32,
    consecutive_naks: u32,
    max_retries: u32,
}

impl SenderSession {
    pub fn new(messages: Vec<Vec<Vec<u8>>>) -> Self {
        Self::with_retries(messages, MAX_RETRIES)
    }

    pub fn with_retries(messages: Vec<Vec<Vec<u8>>>, max_retries: u32) -> Self {
        Self {
            state: SenderState::Idle,
            messages,
            msg_idx: 0,
            frame_idx: 0,
            enq_attempts: 0,
            consecutive_naks: 0,
            max_retries,
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    fn current_frame(&self) -> Option<Vec<u8>> {
        self.messages
            .get(self.msg_idx)
            .and_then(|frames| frames.get(self.frame_idx))
            .cloned()
    }

    /// Open the session. Writes ENQ, or finishes immediately when there is
    /// nothing to send.
    pub fn start(&mut self) -> Vec<SenderAction> {
        debug_assert_eq!(self.state, SenderState::Idle);
        if self.messages.iter().all(|m| m.is_empty()) {
            debug!("Nothing to send");
            return vec![SenderAction::Finished];
        }
        self.state = SenderState::Establishing;
        self.enq_attempts = 1;
        vec![SenderAction::Write(vec![ENQ])]
    }

    /// Feed one control byte read from the peer.
    pub fn on_byte(&mut self, byte: u8) -> Vec<SenderAction> {
        match self.state {
            SenderState::Idle => {
                debug!("Ignoring byte 0x{:02X} while idle", byte);
                Vec::new()
            }
            SenderState::Establishing => match byte {
                ACK => {
                    debug!("Session accepted after {} ENQ attempts", self.enq_attempts);
                    self.state = SenderState::Sending;
                    self.consecutive_naks = 0;
                    match self.current_frame() {
                        Some(frame) => vec![SenderAction::Write(frame)],
                        None => self.finish(),
                    }
                }
                NAK => {
                    if self.enq_attempts >= self.max_retries {
                        let attempts = self.enq_attempts;
                        self.abort(SenderFailure::NotAccepted { attempts })
                    } else {
                        self.enq_attempts += 1;
                        warn!("ENQ rejected, retrying ({}/{})", self.enq_attempts, self.max_retries);
                        vec![SenderAction::Write(vec![ENQ])]
                    }
                }
                other => {
                    debug!("Ignoring byte 0x{:02X} while establishing", other);
                    Vec::new()
                }
            },
            SenderState::Sending => match byte {
                ACK => {
                    self.consecutive_naks = 0;
                    self.advance()
                }
                NAK => {
                    self.consecutive_naks += 1;
                    if self.consecutive_naks >= self.max_retries {
                        let attempts = self.consecutive_naks;
                        self.abort(SenderFailure::Rejected { attempts })
                    } else {
                        warn!(
                            "Frame rejected, retransmitting ({}/{})",
                            self.consecutive_naks, self.max_retries
                        );
                        match self.current_frame() {
                            Some(frame) => vec![SenderAction::Write(frame)],
                            None => self.finish(),
                        }
                    }
                }
                other => {
                    debug!("Ignoring byte 0x{:02X} while sending", other);
                    Vec::new()
                }
            },
            SenderState::Closing => {
                debug!("Ignoring byte 0x{:02X} while closing", byte);
                Vec::new()
            }
        }
    }

    /// The per-read deadline expired while waiting for the peer.
    pub fn on_timeout(&mut self, after: Duration) -> Vec<SenderAction> {
        if self.state == SenderState::Idle {
            return Vec::new();
        }
        warn!("Peer silent for {:?}, aborting transfer", after);
        self.abort(SenderFailure::Timeout(after))
    }

    fn advance(&mut self) -> Vec<SenderAction> {
        self.frame_idx += 1;
        if self.frame_idx >= self.messages[self.msg_idx].len() {
            self.msg_idx += 1;
            self.frame_idx = 0;
        }
        if self.msg_idx >= self.messages.len() {
            return self.finish();
        }
        match self.current_frame() {
            Some(frame) => vec![SenderAction::Write(frame)],
            None => self.finish(),
        }
    }

    fn finish(&mut self) -> Vec<SenderAction> {
        // Closing is transient: EOT goes out and the session is idle again
        self.state = SenderState::Idle;
        vec![SenderAction::Write(vec![EOT]), SenderAction::Finished]
    }

    fn abort(&mut self, failure: SenderFailure) -> Vec<SenderAction> {
        self.state = SenderState::Idle;
        vec![
            SenderAction::Write(vec![EOT]),
            SenderAction::Abort(failure),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{encode, split_body};

    fn latin1() -> WireEncoding {
        WireEncoding::Latin1
    }

    fn simple_message() -> Vec<Vec<u8>> {
        encode(
            &[
                vec![FieldValue::text("H"), FieldValue::text(r"\^&")],
                vec![FieldValue::text("L"), FieldValue::text("1"), FieldValue::text("N")],
            ],
            latin1(),
            None,
            1,
            true,
        )
        .unwrap()
    }

    #[test]
    fn test_receiver_happy_path() {
        let mut session = ReceiverSession::new(latin1(), false);

        let actions = session.on_bytes(&[ENQ]);
        assert_eq!(actions, vec![ReceiverAction::Reply(ACK)]);
        assert_eq!(session.state(), ReceiverState::Transfer);

        let frames = simple_message();
        let actions = session.on_bytes(&frames[0]);
        match &actions[..] {
            [ReceiverAction::Deliver(records)] => {
                assert_eq!(records.len(), 2);
                assert_eq!(records[0][0], FieldValue::text("H"));
                assert_eq!(records[1][0], FieldValue::text("L"));
            }
            other => panic!("expected delivery, got {:?}", other),
        }

        let actions = session.on_bytes(&[EOT]);
        assert!(actions.is_empty());
        assert_eq!(session.state(), ReceiverState::Idle);
    }

    #[test]
    fn test_receiver_reassembles_chunked_message() {
        let mut session = ReceiverSession::new(latin1(), false);
        session.on_bytes(&[ENQ]);

        let body = b"P|1||PID123\rR|1|^^^TSH|4.2|mIU/L\rL|1|N\r".to_vec();
        let frames = split_body(&body, 20, 1).unwrap();
        assert!(frames.len() > 2);

        for frame in &frames[..frames.len() - 1] {
            let actions = session.on_bytes(frame);
            assert_eq!(actions, vec![ReceiverAction::Reply(ACK)]);
        }

        let actions = session.on_bytes(&frames[frames.len() - 1]);
        match &actions[..] {
            [ReceiverAction::Deliver(records)] => {
                assert_eq!(records.len(), 3);
                assert_eq!(records[1][2], FieldValue::component([None, None, None, Some("TSH")]));
            }
            other => panic!("expected delivery, got {:?}", other),
        }
        assert_eq!(session.buffered(), 0);
    }

    #[test]
    fn test_receiver_handles_partial_reads() {
        let mut session = ReceiverSession::new(latin1(), false);
        session.on_bytes(&[ENQ]);

        let frames = simple_message();
        let (first, second) = frames[0].split_at(frames[0].len() / 2);

        assert!(session.on_bytes(first).is_empty());
        let actions = session.on_bytes(second);
        assert!(matches!(actions[..], [ReceiverAction::Deliver(_)]));
    }

    #[test]
    fn test_receiver_naks_corrupt_frame_and_keeps_buffer() {
        let mut session = ReceiverSession::new(latin1(), false);
        session.on_bytes(&[ENQ]);

        let body = vec![b'd'; 30];
        let frames = split_body(&body, 17, 1).unwrap();

        session.on_bytes(&frames[0]);
        let buffered = session.buffered();
        assert!(buffered > 0);

        let mut corrupt = frames[1].clone();
        corrupt[3] ^= 0x01;
        let actions = session.on_bytes(&corrupt);
        assert_eq!(actions, vec![ReceiverAction::Reply(NAK)]);
        // Buffer unchanged after the rejection
        assert_eq!(session.buffered(), buffered);

        // Retransmission of the same frame is accepted
        let actions = session.on_bytes(&frames[1]);
        assert_eq!(actions, vec![ReceiverAction::Reply(ACK)]);
        assert!(session.buffered() > buffered);
    }

    #[test]
    fn test_receiver_naks_sequence_gap() {
        let mut session = ReceiverSession::new(latin1(), false);
        session.on_bytes(&[ENQ]);

        let body = vec![b'e'; 30];
        let frames = split_body(&body, 17, 1).unwrap();
        session.on_bytes(&frames[0]);
        let actions = session.on_bytes(&frames[2]);
        assert_eq!(actions, vec![ReceiverAction::Reply(NAK)]);
    }

    #[test]
    fn test_receiver_spurious_enq_keeps_buffer() {
        let mut session = ReceiverSession::new(latin1(), false);
        session.on_bytes(&[ENQ]);

        let frames = split_body(&vec![b'f'; 30], 17, 1).unwrap();
        session.on_bytes(&frames[0]);
        let buffered = session.buffered();

        let actions = session.on_bytes(&[ENQ]);
        assert_eq!(actions, vec![ReceiverAction::Reply(NAK)]);
        assert_eq!(session.state(), ReceiverState::Transfer);
        assert_eq!(session.buffered(), buffered);
    }

    #[test]
    fn test_receiver_eot_discards_partial_buffer() {
        let mut session = ReceiverSession::new(latin1(), false);
        session.on_bytes(&[ENQ]);

        let frames = split_body(&vec![b'g'; 30], 17, 1).unwrap();
        session.on_bytes(&frames[0]);
        assert!(session.buffered() > 0);

        session.on_bytes(&[EOT]);
        assert_eq!(session.state(), ReceiverState::Idle);
        assert_eq!(session.buffered(), 0);
    }

    #[test]
    fn test_receiver_ignores_garbage_while_idle() {
        let mut session = ReceiverSession::new(latin1(), false);
        let actions = session.on_bytes(&[0x00, 0x7F, ACK]);
        assert!(actions.is_empty());
        assert_eq!(session.state(), ReceiverState::Idle);
    }

    #[test]
    fn test_sender_happy_path() {
        let frames = simple_message();
        let mut sender = SenderSession::new(vec![frames.clone()]);

        assert_eq!(sender.start(), vec![SenderAction::Write(vec![ENQ])]);
        assert_eq!(sender.state(), SenderState::Establishing);

        let actions = sender.on_byte(ACK);
        assert_eq!(actions, vec![SenderAction::Write(frames[0].clone())]);
        assert_eq!(sender.state(), SenderState::Sending);

        let actions = sender.on_byte(ACK);
        assert_eq!(
            actions,
            vec![SenderAction::Write(vec![EOT]), SenderAction::Finished]
        );
        assert_eq!(sender.state(), SenderState::Idle);
    }

    #[test]
    fn test_sender_walks_chunked_frames_in_order() {
        let frames = split_body(&vec![b'h'; 30], 17, 1).unwrap();
        let mut sender = SenderSession::new(vec![frames.clone()]);

        sender.start();
        let mut written = Vec::new();
        let mut actions = sender.on_byte(ACK);
        loop {
            match actions.first() {
                Some(SenderAction::Write(bytes)) if bytes.len() > 1 => {
                    written.push(bytes.clone());
                    actions = sender.on_byte(ACK);
                }
                _ => break,
            }
        }
        assert_eq!(written, frames);
    }

    #[test]
    fn test_sender_retransmits_same_frame_on_nak() {
        let frames = simple_message();
        let mut sender = SenderSession::new(vec![frames.clone()]);
        sender.start();
        sender.on_byte(ACK);

        let actions = sender.on_byte(NAK);
        assert_eq!(actions, vec![SenderAction::Write(frames[0].clone())]);
    }

    #[test]
    fn test_sender_aborts_after_six_consecutive_naks() {
        let mut sender = SenderSession::new(vec![simple_message()]);
        sender.start();
        sender.on_byte(ACK);

        for _ in 0..5 {
            let actions = sender.on_byte(NAK);
            assert!(matches!(actions[..], [SenderAction::Write(_)]));
        }
        let actions = sender.on_byte(NAK);
        assert_eq!(
            actions,
            vec![
                SenderAction::Write(vec![EOT]),
                SenderAction::Abort(SenderFailure::Rejected { attempts: 6 }),
            ]
        );
    }

    #[test]
    fn test_sender_enq_rejection_exhausts() {
        let mut sender = SenderSession::new(vec![simple_message()]);
        sender.start();

        for _ in 0..5 {
            let actions = sender.on_byte(NAK);
            assert_eq!(actions, vec![SenderAction::Write(vec![ENQ])]);
        }
        let actions = sender.on_byte(NAK);
        assert_eq!(
            actions,
            vec![
                SenderAction::Write(vec![EOT]),
                SenderAction::Abort(SenderFailure::NotAccepted { attempts: 6 }),
            ]
        );
    }

    #[test]
    fn test_sender_timeout_aborts_with_eot() {
        let mut sender = SenderSession::new(vec![simple_message()]);
        sender.start();

        let actions = sender.on_timeout(Duration::from_secs(10));
        assert_eq!(
            actions,
            vec![
                SenderAction::Write(vec![EOT]),
                SenderAction::Abort(SenderFailure::Timeout(Duration::from_secs(10))),
            ]
        );
    }

    #[test]
    fn test_sender_multiple_messages() {
        let first = simple_message();
        let second = encode(
            &[vec![FieldValue::text("Q"), FieldValue::text("1"), FieldValue::text("ALL")]],
            latin1(),
            None,
            1,
            true,
        )
        .unwrap();
        let mut sender = SenderSession::new(vec![first.clone(), second.clone()]);

        sender.start();
        assert_eq!(sender.on_byte(ACK), vec![SenderAction::Write(first[0].clone())]);
        assert_eq!(sender.on_byte(ACK), vec![SenderAction::Write(second[0].clone())]);
        assert_eq!(
            sender.on_byte(ACK),
            vec![SenderAction::Write(vec![EOT]), SenderAction::Finished]
        );
    }

    #[test]
    fn test_sender_with_nothing_to_send() {
        let mut sender = SenderSession::new(vec![]);
        assert_eq!(sender.start(), vec![SenderAction::Finished]);
    }
}
