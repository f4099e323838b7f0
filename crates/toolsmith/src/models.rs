//! These models represent the objects passed around by the agent
//!
//! There are several different related formats we need to interact with:
//! - useChat messages/tool invocations, sent from the client to the server
//! - data stream protocol lines, sent from the server to the client
//! - openai messages/tools, sent from the agent to the LLM
//! - system requests, sent from the agent to the systems providing tools
//!
//! We always immediately convert those data models into the internal structs using
//! to/from helpers. Because of the need for compatibility, the internal models are not
//! an exact match to any of these formats.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
