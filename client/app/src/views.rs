//! Text rendering of every screen. Pure functions of state, nothing here does I/O.
use std::fmt::{self, Write};

use chrono::{DateTime, Local, TimeZone};
use remote::models::{
    Classification, DifficultyFilter, OptionCounts, PollWithPermission, Progress, User,
    VoteWithWord, Word,
};

use crate::{
    history::HistoryState,
    pages::Route,
    session::AuthState,
    vote::VoteState,
};

const BAR_WIDTH: usize = 40;
const RULE: &str = "────────────────────────────────────────────────";

pub fn header(user: Option<&User>) -> String {
    match user {
        Some(user) => format!("WOTING · {}\n{RULE}\n", user.display_name()),
        None => format!("WOTING\n{RULE}\n"),
    }
}

pub fn loading_view() -> String {
    "Cargando...\n".to_string()
}

pub fn error_notice(message: Option<&str>) -> String {
    match message {
        Some(message) if !message.is_empty() => format!("! {message}\n"),
        _ => String::new(),
    }
}

pub fn auth_card(state: &AuthState) -> String {
    let mut out = String::new();
    out.push_str("¡Bienvenido a Woting!\n\n");
    out.push_str("En esta aplicación podrás votar para filtrar la lista de palabras del juego WOS-ES.\n");
    out.push_str("Por favor, inicia sesión con tu cuenta de Google para continuar.\n\n");

    if state.is_loading {
        out.push_str("Iniciando sesión...\n");
    } else {
        out.push_str("Iniciar sesión con Google: wordvote login\n");
    }
    out.push_str(&error_notice(state.error.as_deref()));
    out
}

/// `[#########.......] 35%`, the percent is floored.
pub fn option_stats(progress: &Progress, detailed: bool) -> String {
    let percent = progress.percent().min(100) as usize;
    let filled = percent * BAR_WIDTH / 100;

    let mut out = format!(
        "[{}{}] {percent}%\n",
        "#".repeat(filled),
        ".".repeat(BAR_WIDTH - filled)
    );
    if detailed {
        let _ = writeln!(
            out,
            "Has votado {} de {} palabras totales.",
            progress.voted, progress.total
        );
    }
    out
}

pub fn vote_stats(counts: &OptionCounts) -> String {
    let mut out = format!(
        "Difíciles: {}   Fáciles: {}   No existen: {}\n",
        counts.difficult, counts.easy, counts.not_exist
    );
    out.push_str(&option_stats(&counts.progress(), false));
    out
}

pub fn welcome_card(user: &User, polls: &[PollWithPermission]) -> String {
    let mut out = format!("¡Bienvenido, {}!\n\n", user.display_name());
    out.push_str("En esta aplicación podrás votar para filtrar la lista de palabras del juego WOS-ES.\n");
    out.push_str("En el juego se podrá elegir 2 modos con las palabras consideradas complicadas por los usuarios y las palabras que han votado como fáciles.\n");

    if polls.is_empty() {
        out.push_str("\nNo tienes acceso a ninguna encuesta todavía.\n");
        return out;
    }

    for entry in polls {
        let _ = write!(out, "\n{} (#{})\n", entry.poll.title, entry.poll.id);
        if let Some(description) = &entry.poll.description {
            let _ = writeln!(out, "{description}");
        }
        out.push_str(&option_stats(&entry.progress, false));

        if entry.can_view {
            let _ = writeln!(
                out,
                "  Ver listado de votos: {}",
                Route::History {
                    poll_id: entry.poll.id
                }
            );
        }
        if entry.can_vote {
            let label = if entry.progress.unvoted > 0 {
                "Comenzar a votar"
            } else {
                "Ver estadísticas"
            };
            let _ = writeln!(
                out,
                "  {label}: {}",
                Route::Vote {
                    poll_id: entry.poll.id
                }
            );
        }
    }
    out
}

pub fn definition_link(poll_url: Option<&str>, word: &str) -> Option<String> {
    poll_url.map(|url| format!("{url}{word}"))
}

pub fn voting_card(state: &VoteState) -> String {
    let Some(word) = state.current_word() else {
        return loading_view();
    };

    let mut out = format!("\n    {}\n\n", word.text.to_uppercase());
    if let Some(choice) = state.previous_choice(word.id) {
        let _ = writeln!(out, "Tu voto: {}", choice.label());
    }

    if state.is_loading {
        out.push_str("Enviando...\n");
        return out;
    }

    out.push_str("[1] Fácil   [2] Difícil   [3] No existe");
    if state.can_undo() {
        out.push_str("   [z] Deshacer");
    }
    if state.poll_url.is_some() {
        out.push_str("   [a] Definición");
    }
    out.push_str("   [q] Volver\n");
    out
}

pub fn completed_view(counts: &OptionCounts) -> String {
    let mut out = String::from("¡Has votado todas las palabras disponibles!\n");
    out.push_str("Vuelve más tarde para votar nuevas palabras.\n\n");
    out.push_str("Estadísticas:\n");
    out.push_str(&option_stats(&counts.progress(), true));
    out.push_str("\n[q] Volver al inicio\n");
    out
}

pub fn history_tabs(show_unvoted: bool, show_filters: bool) -> String {
    let (voted, unvoted) = if show_unvoted {
        (" Votadas ", "[Sin votar]")
    } else {
        ("[Votadas]", " Sin votar ")
    };
    let filters = if show_filters { "(filtros)" } else { "" };

    format!("{voted} | {unvoted} {filters}\n")
}

pub fn filters_panel(state: &HistoryState) -> String {
    let mut out = String::from("Buscar: ");
    if state.search_input.is_empty() {
        out.push_str(state.search_placeholder());
    } else {
        out.push_str(&state.search_input);
    }
    out.push('\n');

    if !state.show_unvoted {
        out.push_str("Filtro:");
        for (key, filter) in [
            ('T', DifficultyFilter::All),
            ('F', DifficultyFilter::Easy),
            ('D', DifficultyFilter::Difficult),
            ('N', DifficultyFilter::NotExist),
        ] {
            if filter == state.filter {
                let _ = write!(out, " [{key}]");
            } else {
                let _ = write!(out, " {key}");
            }
        }
        out.push('\n');
    }
    if state.show_clear_button() {
        out.push_str("[c] Limpiar filtros\n");
    }
    out
}

pub fn format_timestamp<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    at.format("%H:%MH %d/%m/%y").to_string()
}

fn choice_keys(current: Classification) -> String {
    Classification::ALL
        .iter()
        .map(|classification| {
            if *classification == current {
                format!("[{}]", classification.short())
            } else {
                format!(" {} ", classification.short())
            }
        })
        .collect()
}

pub fn votes_table(votes: &[VoteWithWord], poll_url: Option<&str>) -> String {
    if votes.is_empty() {
        return "No hay votos que mostrar.\n".to_string();
    }

    let mut out = format!("{:>6}  {:<24} {:<16} {}\n", "#", "Palabra", "Fecha", "Voto");
    for row in votes {
        let word = row
            .word
            .as_ref()
            .map(|word| word.text.to_uppercase())
            .unwrap_or_else(|| "Palabra no encontrada".to_string());
        let at = format_timestamp(&row.vote.created_at.with_timezone(&Local));

        let _ = writeln!(
            out,
            "{:>6}  {:<24} {:<16} {}",
            row.vote.option_id,
            word,
            at,
            choice_keys(row.vote.filter)
        );
        if let Some(link) = row
            .word
            .as_ref()
            .and_then(|word| definition_link(poll_url, &word.text))
        {
            let _ = writeln!(out, "{:>8}{link}", "");
        }
    }
    out
}

pub fn unvoted_table(words: &[Word], poll_url: Option<&str>) -> String {
    if words.is_empty() {
        return String::new();
    }

    let mut out = format!("{:>6}  {}\n", "#", "Palabra");
    for word in words {
        let _ = writeln!(out, "{:>6}  {}", word.id, word.text.to_uppercase());
        if let Some(link) = definition_link(poll_url, &word.text) {
            let _ = writeln!(out, "{:>8}{link}", "");
        }
    }
    out
}

/// `12 votadas - Fácil (42.86%)`, nothing when there is nothing to count.
pub fn history_stats(
    total_rows: u64,
    total_options: u64,
    show_unvoted: bool,
    filter: DifficultyFilter,
    completion: f64,
) -> Option<String> {
    if total_rows == 0 || total_options == 0 {
        return None;
    }

    let label = match (show_unvoted, filter.classification()) {
        (true, _) => " sin votar".to_string(),
        (false, None) => " votadas".to_string(),
        (false, Some(classification)) => format!(" votadas - {}", classification.label()),
    };

    Some(format!("{total_rows}{label} ({completion:.2}%)"))
}

/// `< Página 2 de 5 >`, nothing for a single page.
pub fn pagination(current_page: u32, total_pages: u32) -> String {
    if total_pages <= 1 {
        return String::new();
    }

    let previous = if current_page > 1 { "<" } else { " " };
    let next = if current_page < total_pages { ">" } else { " " };

    format!("{previous} Página {current_page} de {total_pages} {next}\n")
}

pub fn history_view(state: &HistoryState) -> String {
    let mut out = history_tabs(state.show_unvoted, state.show_filters);

    if state.show_filters {
        out.push_str(&filters_panel(state));
    }
    if let Some(stats) = history_stats(
        state.total,
        state.counts.total,
        state.show_unvoted,
        state.filter,
        state.completion_percentage(),
    ) {
        let _ = writeln!(out, "{stats}");
    }
    out.push_str(&error_notice(state.error.as_deref()));

    if state.is_initial_loading {
        out.push_str(&loading_view());
        return out;
    }

    let poll_url = state.poll_url.as_deref();
    if state.show_unvoted {
        out.push_str(&unvoted_table(&state.unvoted_words, poll_url));
    } else {
        out.push_str(&votes_table(&state.votes, poll_url));
    }
    out.push_str(&pagination(state.current_page, state.total_pages()));
    out
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, Utc};
    use remote::models::{Poll, Vote};

    use super::*;

    fn word(id: i64, text: &str) -> Word {
        Word {
            id,
            text: text.to_string(),
            created_at: Utc::now(),
            poll_id: Some(1),
        }
    }

    fn user() -> User {
        User {
            id: "user-1".to_string(),
            email: Some("ana@example.com".to_string()),
            full_name: Some("Ana Ruiz".to_string()),
            role: None,
            created_at: None,
        }
    }

    #[test]
    fn test_history_stats_labels() {
        assert_eq!(
            history_stats(12, 20, false, DifficultyFilter::Easy, 42.857),
            Some("12 votadas - Fácil (42.86%)".to_string())
        );
        assert_eq!(
            history_stats(7, 20, false, DifficultyFilter::All, 35.0),
            Some("7 votadas (35.00%)".to_string())
        );
        assert_eq!(
            history_stats(13, 20, true, DifficultyFilter::All, 65.0),
            Some("13 sin votar (65.00%)".to_string())
        );
        assert_eq!(history_stats(0, 20, false, DifficultyFilter::All, 0.0), None);
    }

    #[test]
    fn test_pagination() {
        assert_eq!(pagination(1, 1), "");
        assert_eq!(pagination(1, 3), "  Página 1 de 3 >\n");
        assert_eq!(pagination(3, 3), "< Página 3 de 3  \n");
    }

    #[test]
    fn test_format_timestamp() {
        let offset = FixedOffset::east_opt(3600).unwrap();
        let at = offset.with_ymd_and_hms(2025, 3, 1, 9, 5, 0).unwrap();
        assert_eq!(format_timestamp(&at), "09:05H 01/03/25");
    }

    #[test]
    fn test_option_stats_bar() {
        let stats = option_stats(&Progress::new(1, 4), true);
        assert!(stats.starts_with(&format!("[{}{}] 25%", "#".repeat(10), ".".repeat(30))));
        assert!(stats.contains("Has votado 1 de 4 palabras totales."));

        let over = option_stats(&Progress::new(9, 4), false);
        assert!(over.contains("100%"));
    }

    #[test]
    fn test_voting_card() {
        let mut state = VoteState {
            words: vec![word(1, "casa"), word(2, "perro")],
            data_loaded: true,
            ..VoteState::default()
        };
        let card = voting_card(&state);
        assert!(card.contains("CASA"));
        assert!(!card.contains("[z]"));
        assert!(!card.contains("[a]"));

        state.history.push(crate::vote::VoteHistoryEntry {
            word: word(1, "casa"),
            classification: Classification::Difficult,
        });
        state.poll_url = Some("https://dle.rae.es/".to_string());
        let card = voting_card(&state);
        assert!(card.contains("Tu voto: Difícil"));
        assert!(card.contains("[z] Deshacer"));
        assert!(card.contains("[a] Definición"));
    }

    #[test]
    fn test_welcome_card_links() {
        let polls = vec![PollWithPermission {
            poll: Poll {
                id: 3,
                title: "Animales".to_string(),
                description: None,
                url: None,
            },
            can_vote: true,
            can_view: false,
            progress: Progress::new(4, 4),
        }];
        let card = welcome_card(&user(), &polls);

        assert!(card.starts_with("¡Bienvenido, Ana!"));
        assert!(card.contains("Ver estadísticas: /vote?pollId=3"));
        assert!(!card.contains("/history"));
    }

    #[test]
    fn test_votes_table_missing_word() {
        let row = VoteWithWord {
            vote: Vote {
                id: 1,
                user_id: "user-1".to_string(),
                option_id: 9,
                poll_id: Some(1),
                filter: Classification::NotExist,
                created_at: Utc::now(),
            },
            word: None,
        };
        let table = votes_table(&[row], Some("https://dle.rae.es/"));

        assert!(table.contains("Palabra no encontrada"));
        assert!(table.contains(" F  D [N]"));
        assert!(!table.contains("https://"));
    }

    #[test]
    fn test_definition_link() {
        assert_eq!(
            definition_link(Some("https://dle.rae.es/"), "casa"),
            Some("https://dle.rae.es/casa".to_string())
        );
        assert_eq!(definition_link(None, "casa"), None);
    }
}
