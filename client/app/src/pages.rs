//! # Pages
//!
//! Each route composes a controller with its views and reads one command per line.
//!
//! | Route | Page |
//! |-------|------|
//! | `/` | welcome card with the user's polls |
//! | `/vote?pollId=N` | one word at a time |
//! | `/history?pollId=N` | past votes and unvoted words |
//!
//! A route without a poll id, or any page visited without a session, lands on `/`.
use std::{fmt, io::Write, str::FromStr};

use remote::models::{PollId, Scope, User};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::{error, info};

use crate::{
    error::AppError,
    history::HistoryController,
    shortcuts::{
        HISTORY_HELP, HistoryCommand, VOTE_HELP, VoteCommand, parse_history_command,
        parse_vote_command,
    },
    state::State,
    supply::WordSupply,
    views,
    vote::VoteController,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    Home,
    Vote { poll_id: PollId },
    History { poll_id: PollId },
}

impl FromStr for Route {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (path, query) = s.split_once('?').unwrap_or((s, ""));

        let poll_id = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == "pollId")
            .and_then(|(_, value)| value.parse::<PollId>().ok());

        match (path.trim_end_matches('/'), poll_id) {
            ("", _) => Ok(Route::Home),
            ("/vote", Some(poll_id)) => Ok(Route::Vote { poll_id }),
            ("/history", Some(poll_id)) => Ok(Route::History { poll_id }),
            ("/vote" | "/history", None) => Ok(Route::Home),
            _ => Err(AppError::Config(format!("unknown route {s}"))),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Home => f.write_str("/"),
            Route::Vote { poll_id } => write!(f, "/vote?pollId={poll_id}"),
            Route::History { poll_id } => write!(f, "/history?pollId={poll_id}"),
        }
    }
}

/// Line input plus text output.
pub struct Terminal<R, W> {
    lines: Lines<R>,
    out: W,
}

impl<R: AsyncBufRead + Unpin, W: Write> Terminal<R, W> {
    pub fn new(input: R, out: W) -> Self {
        Self {
            lines: input.lines(),
            out,
        }
    }

    pub fn show(&mut self, text: &str) -> Result<(), AppError> {
        self.out.write_all(text.as_bytes())?;
        self.out.flush()?;
        Ok(())
    }

    /// `None` once the input is closed.
    pub async fn prompt(&mut self) -> Result<Option<String>, AppError> {
        self.show("> ")?;
        Ok(self.lines.next_line().await?)
    }

    pub fn into_output(self) -> W {
        self.out
    }
}

/// Runs pages starting at `route` until the user quits or the input ends.
pub async fn run<R, W>(
    state: &State,
    terminal: &mut Terminal<R, W>,
    mut route: Route,
) -> Result<(), AppError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    loop {
        info!("Opening {route}");

        let next = match (route, state.auth.user().await) {
            (Route::Home, user) => home_page(state, terminal, user).await?,
            (Route::Vote { poll_id }, Some(user)) => {
                vote_page(state, terminal, &user, poll_id).await?
            }
            (Route::History { poll_id }, Some(user)) => {
                history_page(state, terminal, &user, poll_id).await?
            }
            (_, None) => Some(Route::Home),
        };

        match next {
            Some(next) => route = next,
            None => return Ok(()),
        }
    }
}

async fn home_page<R, W>(
    state: &State,
    terminal: &mut Terminal<R, W>,
    user: Option<User>,
) -> Result<Option<Route>, AppError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let Some(user) = user else {
        let auth = state.auth.snapshot().await;
        terminal.show(&views::header(None))?;
        terminal.show(&views::auth_card(&auth))?;
        return Ok(None);
    };

    let polls = match state.backend().await.get_user_polls(&user.id).await {
        Ok(polls) => polls,
        Err(e) => {
            error!("Error al cargar encuestas: {e}");
            Vec::new()
        }
    };

    terminal.show(&views::header(Some(&user)))?;
    terminal.show(&views::welcome_card(&user, &polls))?;

    loop {
        terminal.show("\nEscribe una ruta para abrirla, q para salir.\n")?;
        let Some(line) = terminal.prompt().await? else {
            return Ok(None);
        };

        match line.trim() {
            "q" => return Ok(None),
            "" => continue,
            path => match path.parse::<Route>() {
                Ok(route) => return Ok(Some(route)),
                Err(e) => terminal.show(&views::error_notice(Some(&e.to_string())))?,
            },
        }
    }
}

async fn vote_page<R, W>(
    state: &State,
    terminal: &mut Terminal<R, W>,
    user: &User,
    poll_id: PollId,
) -> Result<Option<Route>, AppError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let backend = state.backend().await;
    let supply = WordSupply::new(state.config.supply, backend.clone(), state.config.batch_size);
    let mut controller = VoteController::new(
        backend,
        state.counts_cache.clone(),
        supply,
        Scope::new(user.id.clone(), poll_id),
    );

    terminal.show(&views::header(Some(user)))?;
    terminal.show(&views::loading_view())?;
    controller.mount().await;

    loop {
        let page = controller.state();
        if page.is_completed() {
            terminal.show(&views::completed_view(&page.counts))?;
        } else {
            terminal.show(&views::error_notice(page.error.as_deref()))?;
            terminal.show(&views::voting_card(page))?;
            terminal.show(&views::vote_stats(&page.counts))?;
        }

        let Some(line) = terminal.prompt().await? else {
            return Ok(None);
        };

        match parse_vote_command(&line) {
            Some(VoteCommand::Back) => return Ok(Some(Route::Home)),
            Some(VoteCommand::Vote(classification)) => {
                if let Some(option_id) = controller.state().current_word().map(|word| word.id) {
                    controller.handle_vote(option_id, classification).await;
                }
            }
            Some(VoteCommand::Undo) => {
                if controller.state().can_undo() {
                    controller.handle_undo().await;
                }
            }
            Some(VoteCommand::Definition) => {
                let page = controller.state();
                if let Some(link) = page.current_word().and_then(|word| {
                    views::definition_link(page.poll_url.as_deref(), &word.text)
                }) {
                    terminal.show(&format!("{link}\n"))?;
                }
            }
            None => terminal.show(&format!("{VOTE_HELP}\n"))?,
        }
    }
}

async fn history_page<R, W>(
    state: &State,
    terminal: &mut Terminal<R, W>,
    user: &User,
    poll_id: PollId,
) -> Result<Option<Route>, AppError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut controller = HistoryController::new(
        state.backend().await,
        state.counts_cache.clone(),
        Scope::new(user.id.clone(), poll_id),
    );

    terminal.show(&views::header(Some(user)))?;
    controller.mount().await;

    loop {
        terminal.show(&views::history_view(controller.state()))?;

        let Some(line) = terminal.prompt().await? else {
            return Ok(None);
        };
        let Some(command) = parse_history_command(&line) else {
            terminal.show(&format!("{HISTORY_HELP}\n"))?;
            continue;
        };

        let page = controller.state().current_page;
        match command {
            HistoryCommand::Back => return Ok(Some(Route::Home)),
            HistoryCommand::Next => controller.set_current_page(page + 1).await,
            HistoryCommand::Previous => controller.set_current_page(page.saturating_sub(1)).await,
            HistoryCommand::Page(page) => controller.set_current_page(page).await,
            HistoryCommand::Search(text) => {
                controller.handle_search_input(&text);
                controller.handle_key("Enter").await;
            }
            HistoryCommand::Filter(filter) => controller.handle_difficulty_filter(filter).await,
            HistoryCommand::Clear => controller.handle_clear_filters().await,
            HistoryCommand::ToggleMode => {
                let show_unvoted = !controller.state().show_unvoted;
                controller.set_show_unvoted(show_unvoted).await;
            }
            HistoryCommand::ToggleFilters => controller.handle_show_filters(),
            HistoryCommand::Update(option_id, classification) => {
                controller.handle_update_vote(option_id, classification).await
            }
            HistoryCommand::Vote(option_id, classification) => {
                controller.handle_vote(option_id, classification).await
            }
        }
    }
}
