use std::process::ExitCode;

use app::{AppError, Route, State, callback::CallbackServer, pages, pages::Terminal};
use clap::{Parser, Subcommand};
use tokio::io::{BufReader, stdin};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with Google
    Login,
    /// Sign out and forget the stored session
    Logout,
    /// Show who is signed in
    Whoami,
    /// Polls you can view or vote
    Polls,
    /// Classify unvoted words one at a time
    Vote {
        #[arg(long, default_value_t = 1)]
        poll_id: i64,
    },
    /// Browse past votes and unvoted words
    History {
        #[arg(long, default_value_t = 1)]
        poll_id: i64,
    },
    /// Open a route such as `/vote?pollId=1`
    Open { route: Route },
}

#[tokio::main]
async fn main() -> ExitCode {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();

    match run(args.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), AppError> {
    info!("Initializing state...");
    let state = State::new().await?;

    let route = match command {
        Command::Login => return login(&state).await,
        Command::Logout => {
            state.auth.sign_out().await?;
            println!("Sesión cerrada");
            return Ok(());
        }
        Command::Whoami => {
            match state.auth.user().await {
                Some(user) => println!("{} ({})", user.display_name(), user.id),
                None => println!("Sin sesión"),
            }
            return Ok(());
        }
        Command::Polls => Route::Home,
        Command::Vote { poll_id } => Route::Vote { poll_id },
        Command::History { poll_id } => Route::History { poll_id },
        Command::Open { route } => route,
    };

    let mut terminal = Terminal::new(BufReader::new(stdin()), std::io::stdout());
    pages::run(&state, &mut terminal, route).await
}

async fn login(state: &State) -> Result<(), AppError> {
    let server = CallbackServer::bind(state.config.callback_port).await?;
    let pending = state.auth.sign_in_with_google(server.redirect_to()).await?;

    println!("Abre este enlace para iniciar sesión con Google:\n\n{}\n", pending.url);

    let code = server.wait_for_code().await?;
    let user = state.auth.complete_sign_in(pending, &code).await?;

    println!("¡Bienvenido, {}!", user.display_name());
    Ok(())
}
