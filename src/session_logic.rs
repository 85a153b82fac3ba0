use std::net::SocketAddr;
use tokio::time::Instant;

use crate::message::{Command, Message};
use crate::session::{Session, SessionState};
use crate::session_events::{CloseReason, SessionEvent};

/// What the engine wants done after evaluating a transition. The dispatch
/// shell performs these; the engine itself never touches a socket or the log.
///
/// `Send` is always addressed to the session's registered peer, including
/// close notifications triggered by traffic from somewhere else.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Effect {
    Send(Message),
    Event(SessionEvent),
}

/// How an inbound DATA sequence number relates to the expected one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SequenceOutcome {
    InOrder,
    Duplicate,
    Gap { lost: u32 },
}

pub fn classify_sequence(expected: u32, received: u32) -> SequenceOutcome {
    if received == expected {
        SequenceOutcome::InOrder
    }
    else if received < expected {
        SequenceOutcome::Duplicate
    }
    else {
        SequenceOutcome::Gap { lost: received - expected }
    }
}

/// Evaluates one inbound message against the session's state machine.
///
/// Pure except for the session itself: every send and log entry comes back as
/// an effect value, which keeps the whole state machine testable without a
/// socket. The Lamport clock advances for every message from the registered
/// peer, whatever the transition does with it; a message from a different
/// address is not valid traffic and closes the session without being
/// observed.
pub fn on_message(session: &mut Session, message: &Message, from: SocketAddr, now: Instant) -> Vec<Effect> {
    if from != session.peer_addr {
        return force_close(session, CloseReason::ProtocolViolation);
    }
    session.observe_clock(message.logical_clock);

    match (session.state, message.command) {
        (SessionState::HelloWait, Command::Hello) => {
            session.state = SessionState::Ready;
            session.expected_sequence = message.sequence.saturating_add(1);
            session.touch(now);
            vec![
                Effect::Event(SessionEvent::SessionCreated {
                    session_id: session.session_id,
                    peer_addr: session.peer_addr,
                }),
                Effect::Send(Message::alive(session.session_id, message.sequence, session.tick_clock())),
            ]
        }
        (SessionState::HelloWait, Command::Goodbye) => {
            session.state = SessionState::Closed;
            vec![Effect::Event(SessionEvent::SessionClosed {
                session_id: session.session_id,
                reason: CloseReason::Goodbye,
            })]
        }
        (SessionState::HelloWait, Command::Data | Command::Alive) => {
            force_close(session, CloseReason::ProtocolViolation)
        }
        (SessionState::Ready, Command::Hello) => {
            // duplicate HELLO: idempotent keep-alive, the first reply may have been lost
            session.touch(now);
            vec![Effect::Send(Message::alive(session.session_id, message.sequence, session.tick_clock()))]
        }
        (SessionState::Ready, Command::Data) => on_data(session, message, now),
        (SessionState::Ready, Command::Goodbye) => {
            // Closing is passed through synchronously: the close handshake is a
            // single notify-and-ack round, there is nothing left to wait for
            session.state = SessionState::Closed;
            vec![
                Effect::Event(SessionEvent::SessionClosed {
                    session_id: session.session_id,
                    reason: CloseReason::Goodbye,
                }),
                Effect::Send(Message::goodbye(session.session_id, message.sequence, session.tick_clock())),
            ]
        }
        (SessionState::Ready, Command::Alive) => {
            // clients never send ALIVE, receiving one is out of protocol
            force_close(session, CloseReason::ProtocolViolation)
        }
        (SessionState::Closing | SessionState::Closed, Command::Goodbye) => Vec::new(),
        (SessionState::Closing | SessionState::Closed, command) => {
            vec![Effect::Event(SessionEvent::LateDatagram {
                session_id: session.session_id,
                command,
            })]
        }
    }
}

/// Idle-timeout close, called after the expiry sweep evicted the session. The
/// peer gets a GOODBYE notification but no reply is awaited.
pub fn on_expired(session: &mut Session) -> Vec<Effect> {
    force_close(session, CloseReason::Timeout)
}

/// Server-initiated close: marks the session `Closed` and notifies the
/// registered peer with a GOODBYE stamped with the current expected sequence.
fn force_close(session: &mut Session, reason: CloseReason) -> Vec<Effect> {
    session.state = SessionState::Closed;
    vec![
        Effect::Event(SessionEvent::SessionClosed {
            session_id: session.session_id,
            reason,
        }),
        Effect::Send(Message::goodbye(session.session_id, session.expected_sequence, session.tick_clock())),
    ]
}

fn on_data(session: &mut Session, message: &Message, now: Instant) -> Vec<Effect> {
    session.touch(now);
    let mut effects = Vec::new();

    match classify_sequence(session.expected_sequence, message.sequence) {
        SequenceOutcome::InOrder => {
            session.expected_sequence = message.sequence.saturating_add(1);
            effects.push(Effect::Event(SessionEvent::DataReceived {
                session_id: session.session_id,
                payload: message.payload.clone(),
            }));
        }
        SequenceOutcome::Duplicate => {
            // liveness only, the payload was delivered (or skipped over) before
            effects.push(Effect::Event(SessionEvent::DuplicatePacket {
                session_id: session.session_id,
                sequence: message.sequence,
            }));
        }
        SequenceOutcome::Gap { lost } => {
            effects.push(Effect::Event(SessionEvent::PacketsLost {
                session_id: session.session_id,
                first_missing: session.expected_sequence,
                count: lost,
            }));
            session.expected_sequence = message.sequence.saturating_add(1);
            effects.push(Effect::Event(SessionEvent::DataReceived {
                session_id: session.session_id,
                payload: message.payload.clone(),
            }));
        }
    }

    effects.push(Effect::Send(Message::alive(session.session_id, message.sequence, session.tick_clock())));
    effects
}

#[cfg(test)]
mod tests {
    use rstest::*;

    use crate::session::SessionId;

    use super::*;

    const ID: SessionId = SessionId(0x77);

    fn peer() -> SocketAddr {
        "127.0.0.1:12345".parse().unwrap()
    }

    fn ready_session(expected_sequence: u32, logical_clock: u32) -> Session {
        let mut session = Session::new(ID, peer(), Instant::now());
        session.state = SessionState::Ready;
        session.expected_sequence = expected_sequence;
        session.logical_clock = logical_clock;
        session
    }

    #[rstest]
    #[case::first(0, 0, SequenceOutcome::InOrder)]
    #[case::in_order(5, 5, SequenceOutcome::InOrder)]
    #[case::duplicate(5, 3, SequenceOutcome::Duplicate)]
    #[case::duplicate_far_back(5, 0, SequenceOutcome::Duplicate)]
    #[case::gap_of_one(5, 6, SequenceOutcome::Gap { lost: 1 })]
    #[case::gap_of_four(5, 9, SequenceOutcome::Gap { lost: 4 })]
    #[case::gap_huge(0, u32::MAX, SequenceOutcome::Gap { lost: u32::MAX })]
    fn test_classify_sequence(#[case] expected: u32, #[case] received: u32, #[case] outcome: SequenceOutcome) {
        assert_eq!(classify_sequence(expected, received), outcome);
    }

    #[rstest]
    fn test_hello_establishes_session() {
        let now = Instant::now();
        let mut session = Session::new(ID, peer(), now - std::time::Duration::from_secs(1));

        let effects = on_message(&mut session, &Message::hello(ID, 0, 1), peer(), now);

        assert_eq!(effects, vec![
            Effect::Event(SessionEvent::SessionCreated { session_id: ID, peer_addr: peer() }),
            Effect::Send(Message::alive(ID, 0, 3)),
        ]);
        assert_eq!(session.state, SessionState::Ready);
        assert_eq!(session.expected_sequence, 1);
        assert_eq!(session.logical_clock, 3);
        assert_eq!(session.last_activity, now);
    }

    #[rstest]
    #[case::in_order(vec![0, 1, 2], 3, vec![], vec![])]
    #[case::one_duplicate(vec![0, 1, 1, 2], 3, vec![1], vec![])]
    #[case::gap_of_one(vec![0, 2, 3], 4, vec![], vec![(1, 1)])]
    #[case::gap_then_duplicate(vec![0, 4, 2], 5, vec![2], vec![(1, 3)])]
    fn test_data_sequences(
        #[case] sequences: Vec<u32>,
        #[case] final_expected: u32,
        #[case] duplicates: Vec<u32>,
        #[case] gaps: Vec<(u32, u32)>,
    ) {
        let mut session = ready_session(0, 0);
        let mut seen_duplicates = Vec::new();
        let mut seen_gaps = Vec::new();
        let mut clock = 0u32;

        for sequence in sequences {
            let previous_expected = session.expected_sequence;
            clock += 1;
            let message = Message::data(ID, sequence, clock, format!("payload {}", sequence).into_bytes());

            let effects = on_message(&mut session, &message, peer(), Instant::now());

            assert!(session.expected_sequence >= previous_expected);
            assert_eq!(session.state, SessionState::Ready);
            match effects.last() {
                Some(Effect::Send(reply)) => {
                    assert_eq!(reply.command, Command::Alive);
                    assert_eq!(reply.sequence, sequence);
                }
                other => panic!("expected an ALIVE reply, got {:?}", other),
            }

            for effect in effects {
                match effect {
                    Effect::Event(SessionEvent::DuplicatePacket { sequence, .. }) =>
                        seen_duplicates.push(sequence),
                    Effect::Event(SessionEvent::PacketsLost { first_missing, count, .. }) =>
                        seen_gaps.push((first_missing, count)),
                    _ => {}
                }
            }
        }

        assert_eq!(session.expected_sequence, final_expected);
        assert_eq!(seen_duplicates, duplicates);
        assert_eq!(seen_gaps, gaps);
    }

    #[rstest]
    fn test_duplicate_refreshes_liveness_and_clock() {
        let now = Instant::now();
        let mut session = ready_session(5, 10);
        session.last_activity = now - std::time::Duration::from_secs(10);

        let effects = on_message(&mut session, &Message::data(ID, 2, 20, b"old".to_vec()), peer(), now);

        assert_eq!(effects, vec![
            Effect::Event(SessionEvent::DuplicatePacket { session_id: ID, sequence: 2 }),
            Effect::Send(Message::alive(ID, 2, 22)),
        ]);
        assert_eq!(session.expected_sequence, 5);
        assert_eq!(session.logical_clock, 22);
        assert_eq!(session.last_activity, now);
    }

    #[rstest]
    fn test_gap_reports_all_missing_sequences() {
        let mut session = ready_session(4, 0);

        let effects = on_message(&mut session, &Message::data(ID, 9, 1, b"jump".to_vec()), peer(), Instant::now());

        assert_eq!(effects, vec![
            Effect::Event(SessionEvent::PacketsLost { session_id: ID, first_missing: 4, count: 5 }),
            Effect::Event(SessionEvent::DataReceived { session_id: ID, payload: b"jump".to_vec() }),
            Effect::Send(Message::alive(ID, 9, 3)),
        ]);
        assert_eq!(session.expected_sequence, 10);
    }

    #[rstest]
    fn test_goodbye_in_ready_acks_and_closes() {
        let mut session = ready_session(3, 5);

        let effects = on_message(&mut session, &Message::goodbye(ID, 3, 6), peer(), Instant::now());

        assert_eq!(effects, vec![
            Effect::Event(SessionEvent::SessionClosed { session_id: ID, reason: CloseReason::Goodbye }),
            Effect::Send(Message::goodbye(ID, 3, 8)),
        ]);
        assert_eq!(session.state, SessionState::Closed);
    }

    #[rstest]
    fn test_goodbye_in_hello_wait_closes_silently() {
        let mut session = Session::new(ID, peer(), Instant::now());

        let effects = on_message(&mut session, &Message::goodbye(ID, 0, 1), peer(), Instant::now());

        assert_eq!(effects, vec![
            Effect::Event(SessionEvent::SessionClosed { session_id: ID, reason: CloseReason::Goodbye }),
        ]);
        assert_eq!(session.state, SessionState::Closed);
    }

    #[rstest]
    #[case::data(Message::data(ID, 0, 0, b"early".to_vec()))]
    #[case::alive(Message::alive(ID, 0, 0))]
    fn test_traffic_before_handshake_is_a_violation(#[case] message: Message) {
        let mut session = Session::new(ID, peer(), Instant::now());

        let effects = on_message(&mut session, &message, peer(), Instant::now());

        assert_eq!(effects, vec![
            Effect::Event(SessionEvent::SessionClosed { session_id: ID, reason: CloseReason::ProtocolViolation }),
            Effect::Send(Message::goodbye(ID, 0, 2)),
        ]);
        assert_eq!(session.state, SessionState::Closed);
    }

    #[rstest]
    fn test_hello_in_ready_is_keepalive() {
        let now = Instant::now();
        let mut session = ready_session(4, 8);
        session.last_activity = now - std::time::Duration::from_secs(5);

        let effects = on_message(&mut session, &Message::hello(ID, 0, 9), peer(), now);

        assert_eq!(effects, vec![Effect::Send(Message::alive(ID, 0, 11))]);
        assert_eq!(session.state, SessionState::Ready);
        assert_eq!(session.expected_sequence, 4);
        assert_eq!(session.last_activity, now);
    }

    #[rstest]
    fn test_changed_peer_address_closes_without_clock_observation() {
        let mut session = ready_session(2, 7);
        let intruder: SocketAddr = "10.0.0.1:4711".parse().unwrap();

        let effects = on_message(&mut session, &Message::data(ID, 2, 100, b"x".to_vec()), intruder, Instant::now());

        // the notification goes to the registered peer and carries clock 8:
        // the intruder's clock value 100 was never observed
        assert_eq!(effects, vec![
            Effect::Event(SessionEvent::SessionClosed { session_id: ID, reason: CloseReason::ProtocolViolation }),
            Effect::Send(Message::goodbye(ID, 2, 8)),
        ]);
        assert_eq!(session.state, SessionState::Closed);
        assert_eq!(session.expected_sequence, 2);
    }

    #[rstest]
    #[case::hello_when_closing(SessionState::Closing, Message::hello(ID, 0, 0))]
    #[case::data_when_closing(SessionState::Closing, Message::data(ID, 5, 0, b"late".to_vec()))]
    #[case::alive_when_closed(SessionState::Closed, Message::alive(ID, 5, 0))]
    #[case::data_when_closed(SessionState::Closed, Message::data(ID, 5, 0, b"late".to_vec()))]
    fn test_late_datagram_is_dropped(#[case] state: SessionState, #[case] message: Message) {
        let mut session = ready_session(9, 0);
        session.state = state;

        let effects = on_message(&mut session, &message, peer(), Instant::now());

        assert_eq!(effects, vec![
            Effect::Event(SessionEvent::LateDatagram { session_id: ID, command: message.command }),
        ]);
        assert_eq!(session.state, state);
        assert_eq!(session.expected_sequence, 9);
    }

    #[rstest]
    #[case::closing(SessionState::Closing)]
    #[case::closed(SessionState::Closed)]
    fn test_goodbye_is_idempotent_after_close(#[case] state: SessionState) {
        let mut session = ready_session(9, 0);
        session.state = state;

        let effects = on_message(&mut session, &Message::goodbye(ID, 9, 0), peer(), Instant::now());

        assert_eq!(effects, Vec::new());
        assert_eq!(session.state, state);
    }

    #[rstest]
    fn test_expired_session_notifies_peer() {
        let mut session = ready_session(7, 3);

        let effects = on_expired(&mut session);

        assert_eq!(effects, vec![
            Effect::Event(SessionEvent::SessionClosed { session_id: ID, reason: CloseReason::Timeout }),
            Effect::Send(Message::goodbye(ID, 7, 4)),
        ]);
        assert_eq!(session.state, SessionState::Closed);
    }
}
