//! Keyboard commands read line by line from standard input

use shared::Position;

/// One grid step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    West,
    South,
    East,
    North,
}

impl Direction {
    /// Target cell one step from `from`, or `None` if it leaves an N×N grid
    pub fn step(self, from: Position, grid_size: usize) -> Option<Position> {
        let target = match self {
            Direction::West => Position::new(from.x.checked_sub(1)?, from.y),
            Direction::South => Position::new(from.x, from.y + 1),
            Direction::East => Position::new(from.x + 1, from.y),
            Direction::North => Position::new(from.x, from.y.checked_sub(1)?),
        };
        target.in_bounds(grid_size).then_some(target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `0`: refresh the cached state from the primary
    Refresh,
    /// `1` west, `2` south, `3` east, `4` north
    Move(Direction),
    /// `9`: leave the game
    Exit,
}

impl Command {
    pub fn from_key(key: char) -> Option<Command> {
        match key {
            '0' => Some(Command::Refresh),
            '1' => Some(Command::Move(Direction::West)),
            '2' => Some(Command::Move(Direction::South)),
            '3' => Some(Command::Move(Direction::East)),
            '4' => Some(Command::Move(Direction::North)),
            '9' => Some(Command::Exit),
            _ => None,
        }
    }
}

/// Parses every recognised key on a line, in order, ignoring anything else
pub fn parse_line(line: &str) -> Vec<Command> {
    line.chars().filter_map(Command::from_key).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_filters_noise() {
        let commands = parse_line("1a 3\t0x");
        assert_eq!(
            commands,
            vec![
                Command::Move(Direction::West),
                Command::Move(Direction::East),
                Command::Refresh,
            ]
        );
    }

    #[test]
    fn test_parse_exit() {
        assert_eq!(parse_line("9"), vec![Command::Exit]);
        assert!(parse_line("5678").is_empty());
    }

    #[test]
    fn test_direction_steps() {
        let from = Position::new(2, 2);

        assert_eq!(Direction::West.step(from, 5), Some(Position::new(1, 2)));
        assert_eq!(Direction::South.step(from, 5), Some(Position::new(2, 3)));
        assert_eq!(Direction::East.step(from, 5), Some(Position::new(3, 2)));
        assert_eq!(Direction::North.step(from, 5), Some(Position::new(2, 1)));
    }

    #[test]
    fn test_direction_stops_at_edges() {
        assert_eq!(Direction::West.step(Position::new(0, 3), 5), None);
        assert_eq!(Direction::North.step(Position::new(3, 0), 5), None);
        assert_eq!(Direction::East.step(Position::new(4, 3), 5), None);
        assert_eq!(Direction::South.step(Position::new(3, 4), 5), None);
    }
}
