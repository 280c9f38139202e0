//! Interactive chat loop.

use docqa_rag::{AnswerStatus, Role, Session};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::error;

const HELP: &str = "Commands: /reset clears the conversation, /history shows it, /quit exits.";

/// What the loop should do with one line of input.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Skip,
    Quit,
    Reset,
    History,
    Help,
    Question(&'a str),
}

fn classify(line: &str) -> Input<'_> {
    match line.trim() {
        "" => Input::Skip,
        "/quit" | "/exit" => Input::Quit,
        "/reset" => Input::Reset,
        "/history" => Input::History,
        "/help" => Input::Help,
        question => Input::Question(question),
    }
}

pub async fn run(session: &Session) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;
    println!("Documents indexed. Ask a question. {HELP}");

    loop {
        let line = match editor.readline("docqa> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        match classify(&line) {
            Input::Skip => {}
            Input::Quit => break,
            Input::Help => println!("{HELP}"),
            Input::Reset => {
                session.reset().await;
                println!("Conversation cleared.");
            }
            Input::History => {
                for message in session.history().await {
                    let who = match message.role {
                        Role::User => "you",
                        Role::Assistant => "docqa",
                    };
                    println!("{who}: {}", message.text);
                }
            }
            Input::Question(question) => {
                let _ = editor.add_history_entry(question);
                match session.ask(question).await {
                    Ok(answer) => {
                        println!("\n{}\n", answer.text);
                        if answer.status == AnswerStatus::Grounded {
                            println!("({} passages used)\n", answer.sources.len());
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "question failed");
                        println!("Error: {e}");
                    }
                }
            }
        }
    }
    Ok(())
}
