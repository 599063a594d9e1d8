//! Terminal chat loop.

use medrag::RagPipeline;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::{debug, warn};

use crate::print_response;

const HELP: &str = "Commands: /history shows the conversation, /reset reloads the index and \
models, /clear forgets the conversation, /quit exits.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
struct Turn {
    role: Role,
    content: String,
}

/// What the loop should do with one line of input.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Empty,
    Quit,
    Help,
    History,
    Reset,
    Clear,
    Unknown(&'a str),
    Question(&'a str),
}

impl Role {
    fn label(self) -> &'static str {
        match self {
            Role::User => "you",
            Role::Assistant => "medrag",
        }
    }
}

/// Renders the conversation so far, one `label: content` line per turn.
fn transcript(history: &[Turn]) -> String {
    if history.is_empty() {
        return "No conversation yet.".to_string();
    }
    history
        .iter()
        .map(|turn| format!("{}: {}", turn.role.label(), turn.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn classify(line: &str) -> Input<'_> {
    let line = line.trim();
    match line {
        "" => Input::Empty,
        "/quit" | "/exit" => Input::Quit,
        "/help" => Input::Help,
        "/history" => Input::History,
        "/reset" => Input::Reset,
        "/clear" => Input::Clear,
        _ if line.starts_with('/') => Input::Unknown(line),
        _ => Input::Question(line),
    }
}

pub async fn run(pipeline: &RagPipeline, show_context: bool) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;
    let mut history: Vec<Turn> = Vec::new();
    println!("Ask a medical question. {HELP}");

    loop {
        let line = match editor.readline("medrag> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        match classify(&line) {
            Input::Empty => continue,
            Input::Quit => break,
            Input::Help => println!("{HELP}"),
            Input::History => println!("{}", transcript(&history)),
            Input::Reset => match pipeline.reset().await {
                Ok(()) => println!("Index and models reloaded."),
                Err(e) => println!("Reset failed, still using the previous index: {e}"),
            },
            Input::Clear => {
                history.clear();
                editor.clear_history()?;
                println!("Conversation cleared.");
            }
            Input::Unknown(command) => println!("Unknown command {command}. {HELP}"),
            Input::Question(question) => {
                editor.add_history_entry(question)?;
                history.push(Turn { role: Role::User, content: question.to_string() });

                let response = pipeline.ask_or_apologize(question).await;
                if response.status == medrag::AnswerStatus::Degraded {
                    warn!(question, "answer degraded");
                }
                print_response(&response, show_context);
                history.push(Turn { role: Role::Assistant, content: response.answer });
            }
        }
    }

    debug!(turns = history.len(), "chat ended");
    Ok(())
}
