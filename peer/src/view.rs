//! Text rendering of the cached game state
//!
//! Purely derived from a snapshot; nothing here feeds back into the game.

use shared::{GameSnapshot, PeerRef, Position, Role};
use std::fmt::Write;

#[derive(Debug, Clone)]
pub struct ViewConfig {
    pub own_id: String,
    pub role: Role,
    pub primary: Option<PeerRef>,
    pub backup: Option<PeerRef>,
    pub grid_size: usize,
}

pub fn render(snapshot: &GameSnapshot, config: &ViewConfig) -> String {
    let mut out = render_panel(snapshot, config);
    out.push('\n');
    out.push_str(&render_grid(snapshot, config));
    out
}

/// Status lines followed by one line per member with its score
pub fn render_panel(snapshot: &GameSnapshot, config: &ViewConfig) -> String {
    let mut out = String::new();
    let name = |peer: &Option<PeerRef>| {
        peer.as_ref()
            .map(|peer| peer.id.clone())
            .unwrap_or_else(|| "-".to_string())
    };

    let _ = writeln!(out, "Player {} ({})", config.own_id, config.role);
    let _ = writeln!(
        out,
        "Primary: {}  Backup: {}",
        name(&config.primary),
        name(&config.backup)
    );
    let _ = writeln!(out, "Started: {}", snapshot.start_time);

    for id in snapshot.member_ids() {
        let marker = if id == config.own_id { '>' } else { ' ' };
        let score = snapshot.scores.get(&id).copied().unwrap_or(0);
        let _ = writeln!(out, "{} {:<12} {:>4}", marker, id, score);
    }
    out
}

/// The grid with players shown by the first two characters of their id
/// and treasures as `*`
pub fn render_grid(snapshot: &GameSnapshot, config: &ViewConfig) -> String {
    let mut out = String::new();
    for y in 0..config.grid_size {
        for x in 0..config.grid_size {
            let cell = Position::new(x, y);
            match snapshot.occupant(cell) {
                Some(id) => {
                    let label: String = id.chars().take(2).collect();
                    let _ = write!(out, "{:<3}", label);
                }
                None if snapshot.treasures.contains(&cell) => out.push_str("*  "),
                None => out.push_str(".  "),
            }
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ViewConfig {
        ViewConfig {
            own_id: "ab".to_string(),
            role: Role::Backup,
            primary: Some(PeerRef::new("cd", "127.0.0.1:9002".parse().unwrap())),
            backup: None,
            grid_size: 3,
        }
    }

    fn snapshot() -> GameSnapshot {
        let mut snapshot = GameSnapshot {
            initialized: true,
            start_time: "12:00:00".to_string(),
            ..Default::default()
        };
        snapshot.membership = vec![
            PeerRef::new("ab", "127.0.0.1:9001".parse().unwrap()),
            PeerRef::new("cd", "127.0.0.1:9002".parse().unwrap()),
        ];
        snapshot.positions.insert("ab".to_string(), Position::new(0, 0));
        snapshot.positions.insert("cd".to_string(), Position::new(2, 1));
        snapshot.treasures.push(Position::new(1, 2));
        snapshot.scores.insert("cd".to_string(), 4);
        snapshot
    }

    #[test]
    fn test_render_grid() {
        let grid = render_grid(&snapshot(), &config());
        let rows: Vec<&str> = grid.lines().collect();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], "ab .  .  ");
        assert_eq!(rows[1], ".  .  cd ");
        assert_eq!(rows[2], ".  *  .  ");
    }

    #[test]
    fn test_render_panel() {
        let panel = render_panel(&snapshot(), &config());

        assert!(panel.contains("Player ab (BACKUP)"));
        assert!(panel.contains("Primary: cd  Backup: -"));
        assert!(panel.contains("> ab"));
        assert!(panel.lines().any(|line| line.starts_with("  cd") && line.ends_with('4')));
    }
}
