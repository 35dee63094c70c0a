use colored::*;

pub fn print_header(text: &str) {
    println!("\n{}", text.bright_cyan().bold());
    println!("{}", "=".repeat(text.chars().count()).bright_cyan());
}

pub fn print_success(text: &str) {
    println!("{}", text.green());
}

pub fn print_error(text: &str) {
    eprintln!("{}", text.red().bold());
}

pub fn print_info(text: &str) {
    println!("{}", text.blue());
}

pub fn print_prompt(text: &str) {
    use std::io::Write;
    print!("{}", text.yellow().bold());
    let _ = std::io::stdout().flush();
}

/// A line spoken by the bot.
pub fn print_bot(name: &str, text: &str) {
    println!("{} {}", format!("{}:", name).magenta().bold(), text);
}

/// Something the bot is still working on.
pub fn print_pending(text: &str) {
    println!("{}", text.dimmed().italic());
}
