//! On-screen cards pushed by the service

use serde::Serialize;

use super::command::CardKind;

/// A card shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Card {
    /// Stable identifier, unique within a deck
    pub id: u64,
    pub kind: CardKind,
    pub title: String,
    pub items: Vec<String>,
}

/// Ordered list of active cards
///
/// New cards go to the end; removing one never reorders the rest.
#[derive(Debug, Default)]
pub struct CardDeck {
    cards: Vec<Card>,
    next_id: u64,
}

impl CardDeck {
    /// Create an empty deck
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a card, returning its id
    pub fn push(&mut self, kind: CardKind, title: String, items: Vec<String>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.cards.push(Card {
            id,
            kind,
            title,
            items,
        });
        id
    }

    /// Remove a card by id
    pub fn dismiss(&mut self, id: u64) -> bool {
        match self.cards.iter().position(|c| c.id == id) {
            Some(pos) => {
                self.cards.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Remove the card at `index`
    pub fn dismiss_at(&mut self, index: usize) -> Option<Card> {
        (index < self.cards.len()).then(|| self.cards.remove(index))
    }

    /// Remove every card
    pub fn clear(&mut self) {
        self.cards.clear();
    }

    /// Active cards in display order
    #[must_use]
    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    /// Get card by id
    #[must_use]
    pub fn get(&self, id: u64) -> Option<&Card> {
        self.cards.iter().find(|c| c.id == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dismiss_preserves_order() {
        let mut deck = CardDeck::new();
        let a = deck.push(CardKind::Checklist, "A".into(), vec![]);
        let b = deck.push(CardKind::Banner, "B".into(), vec![]);
        let c = deck.push(CardKind::Alert, "C".into(), vec![]);

        assert!(deck.dismiss(b));
        assert!(!deck.dismiss(b));
        let ids: Vec<u64> = deck.cards().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![a, c]);

        let d = deck.push(CardKind::Checklist, "D".into(), vec![]);
        assert_ne!(d, b);
        assert_eq!(deck.dismiss_at(0).map(|c| c.id), Some(a));
        assert_eq!(deck.dismiss_at(5), None);
        assert_eq!(deck.get(c).map(|c| c.title.as_str()), Some("C"));
    }
}
