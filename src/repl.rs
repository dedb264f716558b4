// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Interactive session over one loader.
//!
//! A bare line is resolved as a specifier. Dot commands trace graphs,
//! detect file formats and inspect the loader.

use crate::commands::{detect, trace};
use owo_colors::OwoColorize;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Config, Editor, Helper};
use spacey_loader::Loader;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use tokio::runtime::Handle;

const HISTORY_FILE: &str = ".spacey_system_history";
const MAX_HISTORY_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplCommand {
    Help,
    Exit,
    Clear,
    Resolve,
    Trace,
    Detect,
    Registry,
    Invalidate,
}

impl ReplCommand {
    /// Parse `.command [argument]`.
    pub fn parse(input: &str) -> Option<(Self, Option<&str>)> {
        let input = input.trim().strip_prefix('.')?;
        let mut parts = input.splitn(2, char::is_whitespace);
        let cmd = parts.next()?.to_lowercase();
        let arg = parts.next().map(str::trim).filter(|arg| !arg.is_empty());

        let command = match cmd.as_str() {
            "help" | "h" | "?" => ReplCommand::Help,
            "exit" | "quit" | "q" => ReplCommand::Exit,
            "clear" | "cls" => ReplCommand::Clear,
            "resolve" | "r" => ReplCommand::Resolve,
            "trace" | "t" => ReplCommand::Trace,
            "detect" | "d" => ReplCommand::Detect,
            "registry" | "ls" => ReplCommand::Registry,
            "invalidate" | "rm" => ReplCommand::Invalidate,
            _ => return None,
        };
        Some((command, arg))
    }

    pub fn all_commands() -> &'static [(&'static str, &'static str)] {
        &[
            (".help", "Show this help message"),
            (".exit", "Exit the session"),
            (".clear", "Clear the screen"),
            (".resolve <spec>", "Resolve a specifier (same as a bare line)"),
            (".trace <spec>", "Load a graph without executing it and print it"),
            (".detect <file>", "Detect the module format of a file"),
            (".registry", "List the keys of loaded modules"),
            (".invalidate <key>", "Forget a module and any cached failure"),
        ]
    }
}

/// Completes and hints dot commands.
struct CommandHelper {
    commands: Vec<String>,
}

impl CommandHelper {
    fn new() -> Self {
        let commands = ReplCommand::all_commands()
            .iter()
            .map(|(usage, _)| usage.split_whitespace().next().unwrap_or(usage).to_string())
            .collect();
        Self { commands }
    }

    fn matching<'a>(&'a self, word: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        self.commands
            .iter()
            .filter(move |cmd| {
                word.starts_with('.') && cmd.starts_with(word) && cmd.len() > word.len()
            })
    }
}

impl Completer for CommandHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let word = &line[..pos];
        if word.contains(char::is_whitespace) {
            return Ok((pos, vec![]));
        }
        let matches = self
            .matching(word)
            .map(|cmd| Pair {
                display: cmd.clone(),
                replacement: cmd[word.len()..].to_string(),
            })
            .collect();
        Ok((pos, matches))
    }
}

impl Hinter for CommandHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<Self::Hint> {
        if pos < line.len() || line.len() < 2 {
            return None;
        }
        self.matching(line)
            .next()
            .map(|cmd| (&cmd[line.len()..]).dimmed().to_string())
    }
}

impl Highlighter for CommandHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if !line.starts_with('.') {
            return Cow::Borrowed(line);
        }
        let split = line.find(char::is_whitespace).unwrap_or(line.len());
        let (cmd, rest) = line.split_at(split);
        Cow::Owned(format!("{}{rest}", cmd.magenta()))
    }

    fn highlight_char(&self, line: &str, _pos: usize, _forced: bool) -> bool {
        line.starts_with('.')
    }
}

impl Validator for CommandHelper {}

impl Helper for CommandHelper {}

enum CommandResult {
    Continue,
    Exit,
}

/// The interactive session.
pub struct Repl {
    loader: Loader,
    runtime: Handle,
    editor: Editor<CommandHelper, DefaultHistory>,
    history_path: PathBuf,
}

impl Repl {
    /// Create a session. `runtime` drives the loader; [`Repl::run`] must be
    /// called off the runtime's worker threads.
    pub fn new(loader: Loader, runtime: Handle) -> rustyline::Result<Self> {
        let config = Config::builder()
            .history_ignore_dups(true)?
            .history_ignore_space(true)
            .max_history_size(MAX_HISTORY_SIZE)?
            .auto_add_history(true)
            .build();

        let mut editor = Editor::with_config(config)?;
        editor.set_helper(Some(CommandHelper::new()));

        let history_path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("spacey")
            .join(HISTORY_FILE);
        if let Some(parent) = history_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = editor.load_history(&history_path);

        Ok(Self {
            loader,
            runtime,
            editor,
            history_path,
        })
    }

    pub fn run(&mut self) -> rustyline::Result<()> {
        self.print_banner();

        loop {
            let prompt = format!("{} ", "system>".bright_green().bold());
            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if let Some((cmd, arg)) = ReplCommand::parse(trimmed) {
                        match self.execute_command(cmd, arg) {
                            CommandResult::Continue => continue,
                            CommandResult::Exit => break,
                        }
                    }
                    if trimmed.starts_with('.') {
                        eprintln!("{}: unknown command {}", "Error".red().bold(), trimmed.cyan());
                        continue;
                    }
                    self.resolve(trimmed);
                }
                Err(ReadlineError::Interrupted) => {
                    println!("{}", "^C".dimmed());
                }
                Err(ReadlineError::Eof) => {
                    println!("{}", "^D".dimmed());
                    break;
                }
                Err(err) => {
                    eprintln!("{}: {err:?}", "Error".red().bold());
                    break;
                }
            }
        }

        let _ = self.editor.save_history(&self.history_path);
        Ok(())
    }

    fn print_banner(&self) {
        println!();
        println!(
            "  {} {} {}",
            "spacey-system".white().bold(),
            "v".dimmed(),
            env!("CARGO_PKG_VERSION").bright_yellow()
        );
        println!("  {} {}", "baseURL".dimmed(), self.loader.config().base_url);
        println!(
            "  {} {} {}",
            "Type".dimmed(),
            ".help".cyan(),
            "for available commands".dimmed()
        );
        println!();
    }

    fn execute_command(&mut self, cmd: ReplCommand, arg: Option<&str>) -> CommandResult {
        let needs_arg = matches!(
            cmd,
            ReplCommand::Resolve
                | ReplCommand::Trace
                | ReplCommand::Detect
                | ReplCommand::Invalidate
        );
        if needs_arg && arg.is_none() {
            eprintln!("{}: command needs an argument", "Error".red().bold());
            return CommandResult::Continue;
        }
        let arg = arg.unwrap_or_default();

        match cmd {
            ReplCommand::Help => self.print_help(),
            ReplCommand::Exit => return CommandResult::Exit,
            ReplCommand::Clear => print!("\x1B[2J\x1B[H"),
            ReplCommand::Resolve => self.resolve(arg),
            ReplCommand::Trace => self.trace(arg),
            ReplCommand::Detect => match self.runtime.block_on(detect::describe(Path::new(arg))) {
                Ok(line) => println!("{line}"),
                Err(err) => print_error(&err.to_string()),
            },
            ReplCommand::Registry => {
                let mut keys = self.loader.registry().keys();
                keys.sort();
                for key in keys {
                    println!("  {}", key.cyan());
                }
            }
            ReplCommand::Invalidate => {
                if self.loader.invalidate(arg) {
                    println!("{} {}", "Invalidated".green(), arg.cyan());
                } else {
                    println!("{} {}", "Not loaded:".yellow(), arg.cyan());
                }
            }
        }
        CommandResult::Continue
    }

    fn resolve(&self, specifier: &str) {
        match self.runtime.block_on(self.loader.resolve(specifier, None)) {
            Ok(key) => println!("{key}"),
            Err(err) => print_error(&err.to_string()),
        }
    }

    fn trace(&self, specifier: &str) {
        match self.runtime.block_on(trace::trace_graph(&self.loader, specifier)) {
            Ok((root, traces)) => print!("{}", trace::render_tree(&root, &traces)),
            Err(err) => print_error(&err.to_string()),
        }
    }

    fn print_help(&self) {
        println!();
        println!("{}", "Commands:".white().bold());
        println!();
        for (cmd, desc) in ReplCommand::all_commands() {
            println!("  {:20} {}", cmd.cyan(), desc.dimmed());
        }
        println!();
    }
}

/// Print an error, highlighting its kind prefix.
fn print_error(message: &str) {
    match message.split_once(':') {
        Some((kind, rest)) if !kind.contains(char::is_whitespace) => {
            eprintln!("{}:{rest}", kind.red().bold());
        }
        _ => eprintln!("{}", message.red()),
    }
}
