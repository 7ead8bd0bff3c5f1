use crate::{
    engine::Generator,
    error::{ChatError, ChatResult},
    session::{render_transcript, ChatSession},
    tokenizer::{ByteTokenizer, TokenCodec},
    turn::{Exchange, TurnAccumulator},
};

/// Replies "ok" followed by the marker.
struct Echo;

impl Generator for Echo {
    fn generate(&self, prompt: &[u32], _: usize, stop: u32, _: u32) -> ChatResult<Vec<Vec<u32>>> {
        let mut seq = prompt.to_vec();
        seq.extend(b"ok".iter().map(|&b| u32::from(b)));
        seq.push(stop);
        Ok(vec![seq])
    }
}

#[test]
fn test_submit_updates_history_and_transcript() {
    let acc = TurnAccumulator::new(ByteTokenizer::default(), Echo, 4000);
    let mut session = ChatSession::new();
    assert!(session.history().is_empty());

    let transcript = session.submit(&acc, "oi").unwrap().to_vec();
    assert_eq!(transcript, vec![Exchange::new("oi", "ok")]);
    assert_eq!(session.turns(), 1);

    let first_len = session.history().len();
    session.submit(&acc, "e aí").unwrap();
    assert!(session.history().len() > first_len);
    assert_eq!(session.transcript().len(), 2);
}

#[test]
fn test_failed_turn_leaves_session_untouched() {
    let acc = TurnAccumulator::new(ByteTokenizer::default(), Echo, 12);
    let mut session = ChatSession::new();

    session.submit(&acc, "oi").unwrap();
    let history = session.history().to_vec();
    let transcript = session.transcript().to_vec();

    let err = session.submit(&acc, "uma frase longa").unwrap_err();
    assert!(matches!(err, ChatError::LengthExceeded { .. }));
    assert_eq!(session.history(), history.as_slice());
    assert_eq!(session.transcript(), transcript.as_slice());
    assert_eq!(session.turns(), 1);
}

#[test]
fn test_reset_starts_a_new_conversation() {
    let acc = TurnAccumulator::new(ByteTokenizer::default(), Echo, 4000);
    let mut session = ChatSession::new();
    session.submit(&acc, "oi").unwrap();

    session.reset();
    assert!(session.history().is_empty());
    assert!(session.transcript().is_empty());
    assert_eq!(session.turns(), 0);

    let transcript = session.submit(&acc, "de novo").unwrap();
    assert_eq!(transcript.len(), 1);
}

#[test]
fn test_sessions_do_not_share_history() {
    let codec = ByteTokenizer::default();
    let acc = TurnAccumulator::new(&codec, Echo, 4000);
    let mut a = ChatSession::new();
    let mut b = ChatSession::new();

    a.submit(&acc, "primeira").unwrap();
    b.submit(&acc, "outra").unwrap();

    let mut expected = codec.encode("outra").unwrap();
    expected.push(codec.end_marker_token_id());
    assert!(b.history().starts_with(&expected));
    assert_eq!(b.transcript(), &[Exchange::new("outra", "ok")]);
}

#[test]
fn test_render_transcript() {
    let rendered = render_transcript(&[Exchange::new("oi", "olá"), Exchange::new("tudo?", "")]);
    assert_eq!(rendered, "You: oi\nBot: olá\nYou: tudo?\nBot: \n");
    assert_eq!(render_transcript(&[]), "");
}
