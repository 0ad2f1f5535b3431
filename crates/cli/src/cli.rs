use clap::Parser;

/// Terminal client for the relay server.
///
/// Streams chat responses over SSE and renders them as they arrive.
#[derive(Parser, Debug)]
#[command(name = "relay", about = "Terminal client for the relay server")]
pub struct CliArgs {
    /// Base URL of the relay server
    #[arg(long, env = "RELAY_SERVER_URL", default_value = "http://localhost:3001")]
    pub server: String,

    /// Continue an existing conversation by id
    #[arg(long)]
    pub conversation: Option<String>,

    /// System prompt override
    #[arg(long)]
    pub system_prompt: Option<String>,

    /// Lower the server's turn ceiling for each request
    #[arg(long)]
    pub max_turns: Option<usize>,

    /// Send a single message, print the response and exit
    #[arg(long, short)]
    pub message: Option<String>,

    /// Print the stored messages of `--conversation` and exit
    #[arg(long, requires = "conversation")]
    pub history: bool,
}
