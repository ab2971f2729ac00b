use std::path::PathBuf;

use clap::Parser;
use export::{ExportOptions, export_votes, progress_bar};
use remote::{
    models::{Classification, DEFAULT_POLL_ID},
    supabase::SupabaseProject,
};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// User whose votes are exported
    #[arg(long)]
    user_id: String,

    #[arg(long, default_value_t = DEFAULT_POLL_ID)]
    poll_id: i64,

    /// Classifications to export
    #[arg(long, value_delimiter = ',', default_value = "difficult,not_exist")]
    filters: Vec<Classification>,

    #[arg(long, default_value = "votadas.json")]
    output: PathBuf,

    #[arg(long, default_value_t = 1000)]
    page_size: u32,

    #[arg(long, env = "SUPABASE_URL")]
    supabase_url: String,

    /// Service key, row-level security would hide other users' votes from the anon key
    #[arg(long, env = "SUPABASE_KEY", hide_env_values = true)]
    supabase_key: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();

    let backend = SupabaseProject::new(&args.supabase_url, &args.supabase_key).backend(None);
    let options = ExportOptions {
        user_id: args.user_id,
        poll_id: args.poll_id,
        filters: args.filters,
        page_size: args.page_size,
        output: args.output,
    };

    let count = export_votes(&backend, &options, &progress_bar()).await?;
    println!("Exportadas {count} palabras a {}", options.output.display());

    Ok(())
}
