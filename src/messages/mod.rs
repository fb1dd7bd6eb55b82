//! Session-layer (admin) message builders: Logon, Heartbeat, TestRequest,
//! Logout, ResendRequest, SequenceReset, Reject.
//!
//! Grounded on the teacher's `protocol::build_logon`/`build_heartbeat`/
//! `build_test_request`/`build_logout`/`build_resend_request`/
//! `build_sequence_reset` free functions, generalized from the teacher's
//! `HashMap`-backed `FixMessage` to [`crate::message::Message`] and
//! extended with `Reject` (35=3), which the session state machine needs for
//! spec §7's protocol-error/sequence-error responses.

use crate::message::Message;

pub fn logon(heart_bt_int: u32, sender_comp_id: &str, target_comp_id: &str, reset_seq_num: bool) -> Message {
    let mut msg = Message::new();
    msg.set(35, "A").set(49, sender_comp_id).set(56, target_comp_id).set(108, heart_bt_int.to_string());
    if reset_seq_num {
        msg.set(141, "Y");
    }
    msg
}

pub fn heartbeat(test_req_id: Option<&str>, sender_comp_id: &str, target_comp_id: &str) -> Message {
    let mut msg = Message::new();
    msg.set(35, "0").set(49, sender_comp_id).set(56, target_comp_id);
    if let Some(id) = test_req_id {
        msg.set(112, id);
    }
    msg
}

pub fn test_request(test_req_id: &str, sender_comp_id: &str, target_comp_id: &str) -> Message {
    let mut msg = Message::new();
    msg.set(35, "1").set(49, sender_comp_id).set(56, target_comp_id).set(112, test_req_id);
    msg
}

pub fn logout(text: Option<&str>, sender_comp_id: &str, target_comp_id: &str) -> Message {
    let mut msg = Message::new();
    msg.set(35, "5").set(49, sender_comp_id).set(56, target_comp_id);
    if let Some(t) = text {
        msg.set(58, t);
    }
    msg
}

pub fn resend_request(begin_seq_no: u64, end_seq_no: u64, sender_comp_id: &str, target_comp_id: &str) -> Message {
    let mut msg = Message::new();
    msg.set(35, "2")
        .set(49, sender_comp_id)
        .set(56, target_comp_id)
        .set(7, begin_seq_no.to_string())
        .set(16, end_seq_no.to_string());
    msg
}

/// `end_seq_no == 0` means "through the current end of the stream", the FIX
/// convention for an open-ended resend request.
pub fn resend_request_open_ended(begin_seq_no: u64, sender_comp_id: &str, target_comp_id: &str) -> Message {
    resend_request(begin_seq_no, 0, sender_comp_id, target_comp_id)
}

pub fn sequence_reset(new_seq_no: u64, gap_fill: bool, sender_comp_id: &str, target_comp_id: &str) -> Message {
    let mut msg = Message::new();
    msg.set(35, "4").set(49, sender_comp_id).set(56, target_comp_id).set(36, new_seq_no.to_string());
    if gap_fill {
        msg.set(123, "Y");
    }
    msg
}

/// Session-level `Reject` (35=3): `ref_seq_num` (45) is the MsgSeqNum of the
/// rejected message, `reason` is `SessionRejectReason` (373).
pub fn reject(
    ref_seq_num: u64,
    reason: u32,
    text: Option<&str>,
    sender_comp_id: &str,
    target_comp_id: &str,
) -> Message {
    let mut msg = Message::new();
    msg.set(35, "3").set(49, sender_comp_id).set(56, target_comp_id).set(45, ref_seq_num.to_string()).set(
        373,
        reason.to_string(),
    );
    if let Some(t) = text {
        msg.set(58, t);
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logon_carries_reset_seq_num_flag_only_when_requested() {
        let with_reset = logon(30, "I", "A", true);
        assert_eq!(with_reset.get(141), Some("Y"));
        let without_reset = logon(30, "I", "A", false);
        assert_eq!(without_reset.get(141), None);
    }

    #[test]
    fn resend_request_carries_the_gap_range() {
        let msg = resend_request(5, 7, "I", "A");
        assert_eq!(msg.get(7), Some("5"));
        assert_eq!(msg.get(16), Some("7"));
    }

    #[test]
    fn reject_carries_ref_seq_num_and_reason() {
        let msg = reject(12, 5, Some("bad checksum"), "I", "A");
        assert_eq!(msg.get(45), Some("12"));
        assert_eq!(msg.get(373), Some("5"));
        assert_eq!(msg.get(58), Some("bad checksum"));
    }
}
