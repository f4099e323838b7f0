use anyhow::Result;

use crate::messages::ToolInvocation;

pub trait Prompt {
    /// Print a streamed text delta as it arrives
    fn render_text(&mut self, text: &str);
    fn render_tool_call(&mut self, invocation: &ToolInvocation);
    fn render_tool_result(&mut self, invocation: &ToolInvocation);
    fn render_error(&mut self, error: &str);
    /// Show the auxiliary button the model asked for
    fn show_button(&mut self);
    fn get_input(&mut self) -> Result<Input>;
    fn show_busy(&mut self);
    fn hide_busy(&mut self);
    /// Hand the input back to the user once a response is over
    fn focus_input(&mut self);
    fn close(&self);
    fn ready(&self) {
        println!("\n");
        println!("Chat is ready! Ask for a sushi dish, a game, or a brand new tool.");
        println!("\n");
    }
}

pub struct Input {
    pub input_type: InputType,
    pub content: Option<String>, // Optional content as sometimes the user may be issuing a command eg. (Exit)
}

pub enum InputType {
    AskAgain, // Ask the user for input again. Control flow command.
    Message,  // User sent a message
    Dismiss,  // User dismissed the auxiliary button
    Exit,     // User wants to exit the session
}

pub enum Theme {
    Light,
    Dark,
}
