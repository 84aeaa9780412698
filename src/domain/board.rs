use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub fn new(value: i64) -> Self {
                Self(value)
            }

            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> i64 {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Store-assigned board identifier
    BoardId
);
entity_id!(
    /// Store-assigned column identifier
    ColumnId
);
entity_id!(
    /// Store-assigned card identifier
    CardId
);

/// Kind of entity an id refers to, used in error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Board,
    Column,
    Card,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Board => write!(f, "Board"),
            Self::Column => write!(f, "Column"),
            Self::Card => write!(f, "Card"),
        }
    }
}

/// Parent under which sibling positions are kept contiguous.
///
/// Columns are ordered within a board, cards within a column. The derived
/// ordering puts every board scope before every column scope; the
/// coordinator relies on it to acquire several scope locks without deadlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Scope {
    Board(BoardId),
    Column(ColumnId),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Board(id) => write!(f, "board {}", id),
            Self::Column(id) => write!(f, "column {}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub id: BoardId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Board {
    /// Scope holding this board's columns
    pub fn scope(&self) -> Scope {
        Scope::Board(self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: ColumnId,
    pub board_id: BoardId,
    pub name: String,
    pub position: i64,
    pub created_at: DateTime<Utc>,
}

impl Column {
    /// Scope this column is ordered in
    pub fn parent_scope(&self) -> Scope {
        Scope::Board(self.board_id)
    }

    /// Scope holding this column's cards
    pub fn scope(&self) -> Scope {
        Scope::Column(self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub board_id: BoardId,
    pub column_id: ColumnId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    pub position: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Card {
    pub fn parent_scope(&self) -> Scope {
        Scope::Column(self.column_id)
    }

    /// Applies a patch to the free-text attributes
    pub fn apply_patch(&mut self, patch: &CardPatch, now: DateTime<Utc>) {
        if let Some(title) = &patch.title {
            self.title = title.trim().to_string();
        }
        if let Some(description) = &patch.description {
            self.description = non_empty(description);
        }
        if let Some(labels) = &patch.labels {
            self.labels = normalize_labels(labels);
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
        self.updated_at = Some(now);
    }

    /// Whether the title or any single label contains `query`, ignoring
    /// case with full Unicode folding
    pub fn matches_query(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.title.to_lowercase().contains(&query)
            || self
                .labels
                .iter()
                .any(|label| label.to_lowercase().contains(&query))
    }
}

/// Attributes of a card about to be created
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewCard {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

impl NewCard {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_due_date(mut self, due_date: NaiveDate) -> Self {
        self.due_date = Some(due_date);
        self
    }

    /// Trims free text and drops empty optional fields
    pub fn normalized(&self) -> Self {
        Self {
            title: self.title.trim().to_string(),
            description: self.description.as_deref().and_then(non_empty),
            labels: normalize_labels(&self.labels),
            due_date: self.due_date,
        }
    }
}

/// Partial update of a card's free-text attributes.
///
/// `None` leaves a field alone. An empty description clears it, and
/// `Some(None)` clears the due date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    #[serde(default)]
    pub due_date: Option<Option<NaiveDate>>,
}

impl CardPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.labels.is_none()
            && self.due_date.is_none()
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Trims labels, drops empty ones and commas that would break the stored form
pub fn normalize_labels(labels: &[String]) -> Vec<String> {
    labels
        .iter()
        .flat_map(|label| label.split(','))
        .filter_map(non_empty)
        .collect()
}

/// Parses the comma-separated label form used by SQL backends
pub fn parse_labels(raw: Option<&str>) -> Vec<String> {
    raw.map(|value| value.split(',').filter_map(non_empty).collect())
        .unwrap_or_default()
}

/// Joins labels into the comma-separated stored form
pub fn join_labels(labels: &[String]) -> Option<String> {
    if labels.is_empty() {
        None
    } else {
        Some(labels.join(","))
    }
}

/// Board seeded into an empty store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardConfig {
    pub name: String,
    pub columns: Vec<String>,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            name: "Task Board".to_string(),
            columns: vec![
                "Backlog".to_string(),
                "In Progress".to_string(),
                "Review".to_string(),
                "Done".to_string(),
            ],
        }
    }
}

/// A column with its cards in display order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnView {
    pub column: Column,
    pub cards: Vec<Card>,
}

/// A board with its columns and cards in display order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardView {
    pub board: Board,
    pub columns: Vec<ColumnView>,
}

impl BoardView {
    /// Finds a column by name
    pub fn column_named(&self, name: &str) -> Option<&ColumnView> {
        self.columns.iter().find(|view| view.column.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_ordering_puts_boards_first() {
        let mut scopes = vec![
            Scope::Column(ColumnId::new(1)),
            Scope::Board(BoardId::new(9)),
            Scope::Column(ColumnId::new(0)),
            Scope::Board(BoardId::new(2)),
        ];
        scopes.sort();
        assert_eq!(
            scopes,
            vec![
                Scope::Board(BoardId::new(2)),
                Scope::Board(BoardId::new(9)),
                Scope::Column(ColumnId::new(0)),
                Scope::Column(ColumnId::new(1)),
            ]
        );
    }

    #[test]
    fn test_label_round_trip_through_stored_form() {
        let labels = normalize_labels(&[
            " design ".to_string(),
            "frontend,ux".to_string(),
            "".to_string(),
        ]);
        assert_eq!(labels, vec!["design", "frontend", "ux"]);

        let stored = join_labels(&labels);
        assert_eq!(stored.as_deref(), Some("design,frontend,ux"));
        assert_eq!(parse_labels(stored.as_deref()), labels);
        assert!(parse_labels(None).is_empty());
        assert_eq!(join_labels(&[]), None);
    }

    #[test]
    fn test_card_patch_clears_and_replaces() {
        let now = Utc::now();
        let mut card = Card {
            id: CardId::new(1),
            board_id: BoardId::new(1),
            column_id: ColumnId::new(1),
            title: "Landing page".to_string(),
            description: Some("Hero + CTA".to_string()),
            labels: vec!["design".to_string()],
            due_date: NaiveDate::from_ymd_opt(2026, 1, 5),
            position: 0,
            created_at: now,
            updated_at: None,
        };

        let patch = CardPatch {
            title: Some("  Landing v2 ".to_string()),
            description: Some(String::new()),
            labels: None,
            due_date: Some(None),
        };
        card.apply_patch(&patch, now);

        assert_eq!(card.title, "Landing v2");
        assert_eq!(card.description, None);
        assert_eq!(card.labels, vec!["design"]);
        assert_eq!(card.due_date, None);
        assert_eq!(card.updated_at, Some(now));
        assert!(CardPatch::default().is_empty());
    }

    #[test]
    fn test_query_matches_one_label_at_a_time() {
        let card = Card {
            id: CardId::new(1),
            board_id: BoardId::new(1),
            column_id: ColumnId::new(1),
            title: "Autenticação".to_string(),
            description: None,
            labels: vec!["backend".to_string(), "security".to_string()],
            due_date: None,
            position: 0,
            created_at: Utc::now(),
            updated_at: None,
        };

        assert!(card.matches_query("AUTENTICAÇÃO"));
        assert!(card.matches_query("Secur"));
        assert!(!card.matches_query("d,s"));
        assert!(!card.matches_query("frontend"));
    }

    #[test]
    fn test_default_board_config() {
        let config = BoardConfig::default();
        assert_eq!(config.columns.len(), 4);
        assert_eq!(config.columns[0], "Backlog");
        assert_eq!(config.columns[3], "Done");
    }
}
