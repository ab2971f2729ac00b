use remote::models::{Classification, DifficultyFilter, OptionId};

#[derive(Clone, Debug, PartialEq)]
pub enum VoteCommand {
    Vote(Classification),
    Undo,
    Definition,
    Back,
}

#[derive(Clone, Debug, PartialEq)]
pub enum HistoryCommand {
    Next,
    Previous,
    Page(u32),
    Search(String),
    Filter(DifficultyFilter),
    Clear,
    ToggleMode,
    ToggleFilters,
    Update(OptionId, Classification),
    Vote(OptionId, Classification),
    Back,
}

pub const VOTE_HELP: &str = "1 fácil · 2 difícil · 3 no existe · z deshacer · a definición · q volver";
pub const HISTORY_HELP: &str = "n/p página · g N ir a página · s texto buscar · f t|f|d|n filtrar · c limpiar · t votadas/sin votar · x filtros · e ID 1|2|3 cambiar voto · v ID 1|2|3 votar · q volver";

/// `1`, `2`, `3` or the initials `f`, `d`, `n`.
pub fn classification_key(key: &str) -> Option<Classification> {
    match key.trim().to_ascii_lowercase().as_str() {
        "1" | "f" => Some(Classification::Easy),
        "2" | "d" => Some(Classification::Difficult),
        "3" | "n" | "e" => Some(Classification::NotExist),
        _ => None,
    }
}

fn filter_key(key: &str) -> Option<DifficultyFilter> {
    match key.trim().to_ascii_lowercase().as_str() {
        "t" | "all" | "todas" => Some(DifficultyFilter::All),
        other => classification_key(other)
            .map(DifficultyFilter::from)
            .or_else(|| other.parse().ok()),
    }
}

pub fn parse_vote_command(line: &str) -> Option<VoteCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "z" => Some(VoteCommand::Undo),
        "a" => Some(VoteCommand::Definition),
        "q" => Some(VoteCommand::Back),
        key => classification_key(key)
            .filter(|_| key.len() == 1 && key.chars().all(|c| c.is_ascii_digit()))
            .map(VoteCommand::Vote),
    }
}

pub fn parse_history_command(line: &str) -> Option<HistoryCommand> {
    let line = line.trim();
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    match (command.to_ascii_lowercase().as_str(), rest) {
        ("n", "") => Some(HistoryCommand::Next),
        ("p", "") => Some(HistoryCommand::Previous),
        ("c", "") => Some(HistoryCommand::Clear),
        ("t", "") => Some(HistoryCommand::ToggleMode),
        ("x", "") => Some(HistoryCommand::ToggleFilters),
        ("q", "") => Some(HistoryCommand::Back),
        ("g", page) => page.parse().ok().map(HistoryCommand::Page),
        ("s", text) => Some(HistoryCommand::Search(text.to_string())),
        ("f", filter) => filter_key(filter).map(HistoryCommand::Filter),
        ("e", args) => option_choice(args).map(|(id, c)| HistoryCommand::Update(id, c)),
        ("v", args) => option_choice(args).map(|(id, c)| HistoryCommand::Vote(id, c)),
        _ => None,
    }
}

fn option_choice(args: &str) -> Option<(OptionId, Classification)> {
    let mut parts = args.split_whitespace();
    let id = parts.next()?.parse().ok()?;
    let classification = classification_key(parts.next()?)?;

    parts.next().is_none().then_some((id, classification))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vote(line: &str, expected: Option<VoteCommand>) {
        assert_eq!(parse_vote_command(line), expected, "line {line:?}");
    }

    fn test_history(line: &str, expected: Option<HistoryCommand>) {
        assert_eq!(parse_history_command(line), expected, "line {line:?}");
    }

    #[test]
    fn test_vote_commands() {
        test_vote("1", Some(VoteCommand::Vote(Classification::Easy)));
        test_vote(" 2 ", Some(VoteCommand::Vote(Classification::Difficult)));
        test_vote("3", Some(VoteCommand::Vote(Classification::NotExist)));
        test_vote("Z", Some(VoteCommand::Undo));
        test_vote("a", Some(VoteCommand::Definition));
        test_vote("q", Some(VoteCommand::Back));
        test_vote("4", None);
        test_vote("f", None);
        test_vote("", None);
    }

    #[test]
    fn test_history_commands() {
        test_history("n", Some(HistoryCommand::Next));
        test_history("g 4", Some(HistoryCommand::Page(4)));
        test_history("g cuatro", None);
        test_history(
            "s casa grande",
            Some(HistoryCommand::Search("casa grande".to_string())),
        );
        test_history("s", Some(HistoryCommand::Search(String::new())));
        test_history("f d", Some(HistoryCommand::Filter(DifficultyFilter::Difficult)));
        test_history("f t", Some(HistoryCommand::Filter(DifficultyFilter::All)));
        test_history(
            "f not_exist",
            Some(HistoryCommand::Filter(DifficultyFilter::NotExist)),
        );
        test_history(
            "e 42 3",
            Some(HistoryCommand::Update(42, Classification::NotExist)),
        );
        test_history("v 7 f", Some(HistoryCommand::Vote(7, Classification::Easy)));
        test_history("v 7", None);
        test_history("e 7 1 2", None);
        test_history("n 2", None);
    }
}
