//! Game Data
//!
//! Match-side data model for the card game the lobbies feed into. The lobby
//! layer only needs these shapes at the handoff when a full lobby launches;
//! the rules engine itself lives elsewhere.

use serde::{Deserialize, Serialize};

use crate::network::session::PlayerId;

/// Number of figures each player brings to a match.
pub const FIGURES_PER_PLAYER: usize = 4;

/// A running match, assembled from a launched lobby.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    /// Seat order is join order from the lobby.
    pub players: Vec<GamePlayer>,
    /// Shared draw pile.
    pub deck: Deck,
}

impl Game {
    /// Assemble a match for the given players with a fresh deck.
    pub fn new(player_ids: impl IntoIterator<Item = PlayerId>) -> Self {
        Self {
            players: player_ids.into_iter().map(GamePlayer::new).collect(),
            deck: Deck::default(),
        }
    }
}

/// One seat in a match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GamePlayer {
    /// The lobby identity this seat belongs to.
    pub id: PlayerId,
    /// Cards currently held.
    pub hand: Vec<Card>,
    /// The player's figures on the board.
    pub figures: Vec<Figure>,
}

impl GamePlayer {
    /// Seat a player with an empty hand and figures in the spawn area.
    pub fn new(id: PlayerId) -> Self {
        let figures = (0..FIGURES_PER_PLAYER as u32)
            .map(|n| Figure { id: n, status: FigureStatus::Home, position: 0 })
            .collect();
        Self { id, hand: Vec::new(), figures }
    }
}

/// Where a figure is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FigureStatus {
    /// Still in the spawn area.
    Home,
    /// On the track at `position`.
    Active,
    /// Reached the goal.
    Finished,
}

/// A figure on the board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Figure {
    /// Index within the owning player's set.
    pub id: u32,
    /// Lifecycle status.
    pub status: FigureStatus,
    /// Track position; meaningful only while `Active`.
    pub position: u32,
}

/// A movement card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    /// Card identifier within the deck.
    pub id: u32,
    /// Card kind, e.g. `"standard"` or `"swap"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// How many spaces this card moves a figure.
    pub moves: u32,
}

/// The shared draw pile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Deck {
    /// Remaining cards, top of the pile last.
    pub cards: Vec<Card>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_game_seats_players_with_home_figures() {
        let ids = [PlayerId::generate(), PlayerId::generate()];
        let game = Game::new(ids);

        assert_eq!(game.players.len(), 2);
        assert_eq!(game.players[0].id, ids[0]);
        for player in &game.players {
            assert!(player.hand.is_empty());
            assert_eq!(player.figures.len(), FIGURES_PER_PLAYER);
            assert!(player
                .figures
                .iter()
                .all(|f| f.status == FigureStatus::Home));
        }
        assert!(game.deck.cards.is_empty());
    }

    #[test]
    fn test_card_serialization_uses_type_field() {
        let card = Card { id: 7, kind: "swap".to_string(), moves: 0 };
        let json = serde_json::to_value(&card).unwrap();
        assert_eq!(json["type"], "swap");
        assert_eq!(json["moves"], 0);
    }
}
