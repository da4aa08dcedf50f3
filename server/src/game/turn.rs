//! Turn rotation and win detection.
//!
//! Everything here is a pure transition over a [`Room`] value. The
//! coordinator reads a room, runs one of these, and writes the result back
//! with a conditional update.

use super::{GameError, Player, PlayerRef, Room, RoomPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EliminationOutcome {
    /// Target was already out. Nothing changed.
    AlreadyEliminated,
    /// Target was not holding the turn.
    TurnUnchanged,
    TurnAdvanced,
    GameOver,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub removed: Player,
    pub room_empty: bool,
    pub new_host: Option<String>,
    pub turn_changed: bool,
    pub game_over: bool,
}

/// First non-eliminated seat after `from_index`, wrapping around. Returns
/// `from_index` unchanged when every seat is eliminated.
pub fn next_active_index(players: &[Player], from_index: usize) -> usize {
    let len = players.len();
    if len == 0 {
        return from_index;
    }
    let start = from_index % len;
    (1..=len)
        .map(|step| (start + step) % len)
        .find(|&candidate| !players[candidate].is_eliminated)
        .unwrap_or(from_index)
}

/// The only player still standing, regardless of how many seats exist.
pub fn sole_survivor(players: &[Player]) -> Option<&Player> {
    let mut remaining = players.iter().filter(|p| !p.is_eliminated);
    match (remaining.next(), remaining.next()) {
        (Some(survivor), None) => Some(survivor),
        _ => None,
    }
}

/// Winner of a room with at least two seats where exactly one is left.
pub fn check_winner(players: &[Player]) -> Option<&Player> {
    if players.len() < 2 {
        return None;
    }
    sole_survivor(players)
}

/// Upper-cased last letter of a word, ignoring trailing punctuation.
pub fn last_letter_of(word: &str) -> Option<char> {
    word.trim()
        .chars()
        .rev()
        .find(|c| c.is_alphabetic())
        .and_then(|c| c.to_uppercase().next())
}

pub fn start_game(mut room: Room, start_letter: char) -> Room {
    for player in &mut room.players {
        player.is_eliminated = false;
    }
    room.game_started = true;
    room.current_word = None;
    room.expected_start_letter = Some(start_letter.to_ascii_uppercase());
    room.current_turn_index = 0;
    room.winner_identity = None;
    room.turn_number += 1;
    room
}

pub fn apply_elimination(
    mut room: Room,
    target: &PlayerRef,
) -> Result<(Room, EliminationOutcome), GameError> {
    let index = room
        .position_of(target)
        .ok_or_else(|| GameError::PlayerNotFound(target.to_string()))?;

    if room.players[index].is_eliminated {
        return Ok((room, EliminationOutcome::AlreadyEliminated));
    }
    room.players[index].is_eliminated = true;

    if let Some(winner) = check_winner(&room.players) {
        room.winner_identity = Some(winner.persistent_identity.clone());
        return Ok((room, EliminationOutcome::GameOver));
    }

    if index == room.current_turn_index {
        room.current_turn_index = next_active_index(&room.players, index);
        room.turn_number += 1;
        return Ok((room, EliminationOutcome::TurnAdvanced));
    }

    Ok((room, EliminationOutcome::TurnUnchanged))
}

/// Records a move that has already been validated and advances the turn.
pub fn apply_submission(mut room: Room, word: &str) -> Room {
    let word = word.trim();
    if let Some(letter) = last_letter_of(word) {
        room.expected_start_letter = Some(letter);
    }
    room.current_word = Some(word.to_string());
    room.current_turn_index = next_active_index(&room.players, room.current_turn_index);
    room.turn_number += 1;
    room
}

/// Removes a seat and re-derives host, turn and winner.
pub fn apply_departure(
    mut room: Room,
    who: &PlayerRef,
    reassign_host: bool,
) -> Result<(Room, Departure), GameError> {
    let index = room
        .position_of(who)
        .ok_or_else(|| GameError::PlayerNotFound(who.to_string()))?;
    let removed = room.players.remove(index);

    let mut departure = Departure {
        removed,
        room_empty: room.players.is_empty(),
        new_host: None,
        turn_changed: false,
        game_over: false,
    };

    if departure.room_empty {
        room.current_turn_index = 0;
        return Ok((room, departure));
    }

    if departure.removed.is_host
        && reassign_host
        && let Some(next_host) = room.players.first_mut()
    {
        next_host.is_host = true;
        departure.new_host = Some(next_host.persistent_identity.clone());
    }

    let len = room.players.len();
    match room.phase() {
        RoomPhase::Lobby => room.current_turn_index = 0,
        RoomPhase::Active => {
            if let Some(survivor) = sole_survivor(&room.players) {
                room.winner_identity = Some(survivor.persistent_identity.clone());
                departure.game_over = true;
            } else if index == room.current_turn_index {
                let from = (index + len - 1) % len;
                room.current_turn_index = next_active_index(&room.players, from);
                room.turn_number += 1;
                departure.turn_changed = true;
            } else if index < room.current_turn_index {
                room.current_turn_index -= 1;
            }
        }
        RoomPhase::Finished => {
            if index < room.current_turn_index {
                room.current_turn_index -= 1;
            }
            room.current_turn_index = room.current_turn_index.min(len - 1);
        }
    }

    Ok((room, departure))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn player(identity: &str) -> Player {
        Player::new(Uuid::new_v4(), identity.to_string(), identity.to_uppercase())
    }

    fn room_with(identities: &[&str]) -> Room {
        let mut room = Room::new("TEST01".to_string());
        room.players = identities.iter().map(|id| player(id)).collect();
        if let Some(first) = room.players.first_mut() {
            first.is_host = true;
        }
        room
    }

    fn active_room_with(identities: &[&str]) -> Room {
        start_game(room_with(identities), 'A')
    }

    fn by_identity(identity: &str) -> PlayerRef {
        PlayerRef::PersistentIdentity(identity.to_string())
    }

    fn players_with_mask(len: usize, eliminated_mask: u32) -> Vec<Player> {
        (0..len)
            .map(|i| {
                let mut p = player(&format!("p{}", i));
                p.is_eliminated = eliminated_mask & (1 << i) != 0;
                p
            })
            .collect()
    }

    #[test]
    fn next_active_index_never_lands_on_eliminated_seat() {
        for len in 1..=6usize {
            for mask in 0..(1u32 << len) {
                let players = players_with_mask(len, mask);
                let any_left = players.iter().any(|p| !p.is_eliminated);
                for from in 0..len {
                    let next = next_active_index(&players, from);
                    if any_left {
                        assert!(
                            !players[next].is_eliminated,
                            "len={} mask={:b} from={} picked eliminated seat {}",
                            len,
                            mask,
                            from,
                            next
                        );
                    } else {
                        assert_eq!(next, from);
                    }
                }
            }
        }
    }

    #[test]
    fn next_active_index_wraps_around() {
        let players = players_with_mask(3, 0);
        assert_eq!(next_active_index(&players, 2), 0);
        assert_eq!(next_active_index(&players, 0), 1);
    }

    #[test]
    fn check_winner_iff_exactly_one_left() {
        for len in 2..=6usize {
            for mask in 0..(1u32 << len) {
                let players = players_with_mask(len, mask);
                let remaining = players.iter().filter(|p| !p.is_eliminated).count();
                assert_eq!(check_winner(&players).is_some(), remaining == 1);
            }
        }
    }

    #[test]
    fn single_seat_room_never_produces_a_winner() {
        let players = players_with_mask(1, 0);
        assert!(check_winner(&players).is_none());
    }

    #[test]
    fn last_letter_is_uppercased_and_skips_punctuation() {
        assert_eq!(last_letter_of("Elephant"), Some('T'));
        assert_eq!(last_letter_of("  cat! "), Some('T'));
        assert_eq!(last_letter_of("123"), None);
        assert_eq!(last_letter_of(""), None);
    }

    #[test]
    fn submission_sets_letter_and_passes_turn() {
        let room = active_room_with(&["p1", "p2"]);
        assert_eq!(room.current_turn_index, 0);

        let room = apply_submission(room, "elephant");
        assert_eq!(room.current_word.as_deref(), Some("elephant"));
        assert_eq!(room.expected_start_letter, Some('T'));
        assert_eq!(room.current_turn_index, 1);
    }

    #[test]
    fn submission_skips_eliminated_seat() {
        let mut room = active_room_with(&["p1", "p2", "p3"]);
        room.players[1].is_eliminated = true;

        let room = apply_submission(room, "tiger");
        assert_eq!(room.current_turn_index, 2);
    }

    #[test]
    fn eliminating_active_player_of_two_ends_game_without_turn_change() {
        let room = active_room_with(&["p1", "p2"]);
        let turn_number = room.turn_number;

        let (room, outcome) = apply_elimination(room, &by_identity("p1")).unwrap();
        assert_eq!(outcome, EliminationOutcome::GameOver);
        assert_eq!(room.winner_identity.as_deref(), Some("p2"));
        assert_eq!(room.phase(), RoomPhase::Finished);
        assert_eq!(room.turn_number, turn_number);
    }

    #[test]
    fn eliminating_active_player_advances_turn() {
        let room = active_room_with(&["p1", "p2", "p3"]);
        let (room, outcome) = apply_elimination(room, &by_identity("p1")).unwrap();
        assert_eq!(outcome, EliminationOutcome::TurnAdvanced);
        assert_eq!(room.current_turn_index, 1);
    }

    #[test]
    fn eliminating_idle_player_keeps_turn() {
        let room = active_room_with(&["p1", "p2", "p3"]);
        let (room, outcome) = apply_elimination(room, &by_identity("p3")).unwrap();
        assert_eq!(outcome, EliminationOutcome::TurnUnchanged);
        assert_eq!(room.current_turn_index, 0);
    }

    #[test]
    fn elimination_is_idempotent() {
        let room = active_room_with(&["p1", "p2", "p3"]);
        let (once, _) = apply_elimination(room, &by_identity("p2")).unwrap();
        let (twice, outcome) = apply_elimination(once.clone(), &by_identity("p2")).unwrap();
        assert_eq!(outcome, EliminationOutcome::AlreadyEliminated);
        assert_eq!(once, twice);
    }

    #[test]
    fn eliminating_unknown_player_is_an_error() {
        let room = active_room_with(&["p1", "p2"]);
        let result = apply_elimination(room, &by_identity("ghost"));
        assert!(matches!(result, Err(GameError::PlayerNotFound(_))));
    }

    #[test]
    fn departure_of_turn_holder_passes_turn_to_next_seat() {
        let room = active_room_with(&["p1", "p2", "p3"]);
        let (room, departure) = apply_departure(room, &by_identity("p1"), true).unwrap();
        assert!(departure.turn_changed);
        assert_eq!(room.current_turn_index, 0);
        assert_eq!(room.players[0].persistent_identity, "p2");
        assert_eq!(departure.new_host.as_deref(), Some("p2"));
    }

    #[test]
    fn departure_of_last_seat_holding_turn_wraps() {
        let mut room = active_room_with(&["p1", "p2", "p3"]);
        room.current_turn_index = 2;
        let (room, departure) = apply_departure(room, &by_identity("p3"), true).unwrap();
        assert!(departure.turn_changed);
        assert_eq!(room.current_turn_index, 0);
    }

    #[test]
    fn departure_before_turn_holder_shifts_index() {
        let mut room = active_room_with(&["p1", "p2", "p3"]);
        room.current_turn_index = 2;
        let (room, departure) = apply_departure(room, &by_identity("p1"), true).unwrap();
        assert!(!departure.turn_changed);
        assert_eq!(room.current_turn_index, 1);
        assert_eq!(room.players[1].persistent_identity, "p3");
    }

    #[test]
    fn departure_leaving_one_survivor_ends_game() {
        let room = active_room_with(&["p1", "p2"]);
        let (room, departure) = apply_departure(room, &by_identity("p2"), true).unwrap();
        assert!(departure.game_over);
        assert_eq!(room.winner_identity.as_deref(), Some("p1"));
    }

    #[test]
    fn departure_skips_eliminated_seats_when_passing_turn() {
        let mut room = active_room_with(&["p1", "p2", "p3", "p4"]);
        room.players[1].is_eliminated = true;
        let (room, departure) = apply_departure(room, &by_identity("p1"), true).unwrap();
        assert!(departure.turn_changed);
        assert_eq!(room.players[room.current_turn_index].persistent_identity, "p3");
    }

    #[test]
    fn host_is_sticky_when_reassignment_disabled() {
        let room = room_with(&["p1", "p2"]);
        let (room, departure) = apply_departure(room, &by_identity("p1"), false).unwrap();
        assert!(departure.new_host.is_none());
        assert!(room.host_identity().is_none());
    }

    #[test]
    fn last_departure_empties_room() {
        let room = room_with(&["p1"]);
        let (room, departure) = apply_departure(room, &by_identity("p1"), true).unwrap();
        assert!(departure.room_empty);
        assert!(room.players.is_empty());
    }

    #[test]
    fn start_game_resets_eliminations() {
        let mut room = room_with(&["p1", "p2"]);
        room.players[1].is_eliminated = true;
        let room = start_game(room, 'q');
        assert!(room.players.iter().all(|p| !p.is_eliminated));
        assert_eq!(room.expected_start_letter, Some('Q'));
        assert_eq!(room.current_turn_index, 0);
        assert_eq!(room.phase(), RoomPhase::Active);
    }
}
