use std::io::{self, Write};

use anyhow::Result;
use bat::WrappingMode;
use cliclack::{input, spinner};
use console::style;

use super::prompt::{Input, InputType, Prompt, Theme};
use crate::messages::ToolInvocation;

pub struct CliclackPrompt {
    spinner: Option<cliclack::ProgressBar>,
    theme: Theme,
    // true while a streamed line has not been terminated yet
    mid_line: bool,
}

impl CliclackPrompt {
    pub fn new() -> Self {
        CliclackPrompt {
            spinner: None,
            theme: Theme::Dark,
            mid_line: false,
        }
    }

    fn bat_theme(&self) -> &'static str {
        match self.theme {
            Theme::Light => "GitHub",
            Theme::Dark => "zenburn",
        }
    }

    fn end_line(&mut self) {
        if self.mid_line {
            println!();
            self.mid_line = false;
        }
    }
}

fn print_tool_response(content: &str, theme: &str, tool_name: &str) {
    let printed = bat::PrettyPrinter::new()
        .input(
            bat::Input::from_bytes(content.as_bytes())
                .name(format!("Tool Response: {}", tool_name)),
        )
        .theme(theme)
        .language("JSON")
        .grid(true)
        .header(true)
        .wrapping_mode(WrappingMode::Character)
        .print();
    if printed.is_err() {
        println!("{}", content);
    }
}

fn flush() {
    let _ = io::stdout().flush();
}

impl Prompt for CliclackPrompt {
    fn render_text(&mut self, text: &str) {
        self.hide_busy();
        print!("{}", text);
        self.mid_line = !text.ends_with('\n');
        flush();
    }

    fn render_tool_call(&mut self, invocation: &ToolInvocation) {
        self.hide_busy();
        self.end_line();
        println!(
            "{}",
            style(format!(
                "→ {}({})",
                invocation.tool_name, invocation.args
            ))
            .dim()
        );
    }

    fn render_tool_result(&mut self, invocation: &ToolInvocation) {
        self.end_line();
        let Some(result) = &invocation.result else {
            return;
        };
        let formatted = serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string());
        print_tool_response(&formatted, self.bat_theme(), &invocation.tool_name);
    }

    fn render_error(&mut self, error: &str) {
        self.hide_busy();
        self.end_line();
        println!("{}", style(format!("Error: {}", error)).red());
    }

    fn show_button(&mut self) {
        self.end_line();
        println!(
            "{}  {}",
            style("[ Show Button ]").reverse().bold(),
            style("/dismiss to hide").dim()
        );
    }

    fn show_busy(&mut self) {
        let spinner = spinner();
        spinner.start("awaiting reply");
        self.spinner = Some(spinner);
    }

    fn hide_busy(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.stop("");
        }
    }

    fn focus_input(&mut self) {
        self.hide_busy();
        self.end_line();
        println!();
        flush();
    }

    fn get_input(&mut self) -> Result<Input> {
        let message_text: String = input("Chat:         [Help: /?]")
            .placeholder("")
            .interact()?;
        let message_text = message_text.trim().to_string();

        if message_text.eq_ignore_ascii_case("/exit") || message_text.eq_ignore_ascii_case("/quit")
        {
            Ok(Input {
                input_type: InputType::Exit,
                content: None,
            })
        } else if message_text.eq_ignore_ascii_case("/dismiss") {
            Ok(Input {
                input_type: InputType::Dismiss,
                content: None,
            })
        } else if message_text.eq_ignore_ascii_case("/t") {
            self.theme = match self.theme {
                Theme::Light => {
                    println!("Switching to Dark theme");
                    Theme::Dark
                }
                Theme::Dark => {
                    println!("Switching to Light theme");
                    Theme::Light
                }
            };
            Ok(Input {
                input_type: InputType::AskAgain,
                content: None,
            })
        } else if message_text.eq_ignore_ascii_case("/?") {
            println!("Commands:");
            println!("/exit - Exit the session");
            println!("/dismiss - Hide the button");
            println!("/t - Toggle Light/Dark theme");
            println!("/? - Display this help message");
            println!("Ctrl+C - Stop the response that is streaming");
            Ok(Input {
                input_type: InputType::AskAgain,
                content: None,
            })
        } else {
            Ok(Input {
                input_type: InputType::Message,
                content: Some(message_text),
            })
        }
    }

    fn close(&self) {
        // No cleanup required
    }
}
