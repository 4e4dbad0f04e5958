use std::io::{self, Write};

use anyhow::Result;
use futures::StreamExt;

use crate::agent::{Agent, Role};
use crate::context::RequestContext;

/// Read-eval-print loop around one agent.
///
/// Lines starting with `:` are console commands; anything else is sent to
/// the agent. Streaming mode prints text as it arrives.
pub async fn run(mut agent: Agent) -> Result<()> {
    println!("agent-engine chat ({} via {})", agent.model(), agent.provider_name());
    println!("Type a message, :help for commands, or 'exit' to quit");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            break;
        }

        if let Some(command) = input.strip_prefix(':') {
            let parts: Vec<&str> = command.split_whitespace().collect();
            match parts.as_slice() {
                ["help"] => {
                    println!(":tools            list attached tools");
                    println!(":history          show remembered messages");
                    println!(":clear            forget the conversation");
                    println!(":stream on|off    toggle streaming output");
                }
                ["tools"] => {
                    for tool in agent.tools() {
                        println!("  {:<20} {}", tool.name, tool.description);
                    }
                }
                ["history"] => match agent.memory().messages() {
                    Ok(messages) => {
                        for message in messages {
                            let who = match message.role {
                                Role::User => "you",
                                Role::Assistant => "agent",
                                other => other.as_str(),
                            };
                            println!("[{}] {}", who, message.content);
                        }
                    }
                    Err(e) => eprintln!("Error: {}", e),
                },
                ["clear"] => match agent.clear_memory() {
                    Ok(()) => println!("Memory cleared."),
                    Err(e) => eprintln!("Error: {}", e),
                },
                ["stream", "on"] => agent.set_streaming(true),
                ["stream", "off"] => agent.set_streaming(false),
                _ => eprintln!("Unknown command. Available: :help, :tools, :history, :clear, :stream"),
            }
            continue;
        }

        let ctx = RequestContext::new();
        if agent.is_streaming() {
            let mut stream = agent.chat_stream(&ctx, input)?;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(text) => {
                        print!("{}", text);
                        io::stdout().flush()?;
                    }
                    Err(e) => eprintln!("\nError: {}", e),
                }
            }
            println!();
        } else {
            match agent.chat(&ctx, input).await {
                Ok(reply) => println!("{}", reply),
                Err(e) => eprintln!("Error: {}", e),
            }
        }
    }

    println!("Goodbye!");
    Ok(())
}
