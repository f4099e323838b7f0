mod chat;
mod messages;
mod prompt;
mod transport;

use anyhow::Result;
use clap::Parser;
use console::style;

use chat::{ChatSession, DEFAULT_MAX_STEPS};
use prompt::cliclack::CliclackPrompt;
use prompt::prompt::{InputType, Prompt};
use transport::HttpTransport;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of a running toolsmith server
    #[arg(short, long, default_value = "http://127.0.0.1:3000")]
    server: String,

    /// Automatic round trips allowed after the client resolves a tool call
    #[arg(long, default_value_t = DEFAULT_MAX_STEPS)]
    max_steps: usize,

    /// Send a single message, print the reply and exit
    #[arg(short, long)]
    message: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let transport = HttpTransport::new(&cli.server)?;
    let mut session = ChatSession::new(Box::new(transport)).with_max_steps(cli.max_steps);

    // ctrl-c stops the streaming response instead of the whole process
    let stop = session.stop_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });

    let mut prompt = CliclackPrompt::new();

    if let Some(message) = cli.message {
        session.submit(&message, &mut prompt).await?;
        prompt.close();
        return match session.error() {
            Some(error) => Err(anyhow::anyhow!("{}", error)),
            None => Ok(()),
        };
    }

    println!(
        "Connected to {} {}",
        cli.server,
        style("- type \"/exit\" to end the session").dim()
    );
    prompt.ready();

    loop {
        let input = match prompt.get_input() {
            Ok(input) => input,
            // cliclack reports ctrl-c at the input line as an error
            Err(_) => break,
        };
        match input.input_type {
            InputType::Exit => break,
            InputType::AskAgain => continue,
            InputType::Dismiss => {
                if session.is_button_visible() {
                    session.dismiss_button();
                    println!("{}", style("Button hidden").dim());
                }
            }
            InputType::Message => {
                if let Some(content) = &input.content {
                    session.submit(content, &mut prompt).await?;
                    if session.messages().last().is_some_and(|m| m.failed) {
                        println!("{}", style("Message failed, send it again to retry").dim());
                    }
                }
            }
        }
    }

    prompt.close();
    Ok(())
}
