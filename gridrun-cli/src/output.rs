// Terminal rendering: notices go to stderr, step output goes to stdout.
// Anything about a single instance carries a dimmed `[instance]` tag.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Plain,
    Good,
    Bad,
    Caution,
    Note,
    Muted,
}

impl Tone {
    fn sgr(self) -> Option<&'static str> {
        match self {
            Tone::Plain => None,
            Tone::Good => Some("32"),
            Tone::Bad => Some("31"),
            Tone::Caution => Some("33"),
            Tone::Note => Some("36"),
            Tone::Muted => Some("2"),
        }
    }
}

fn paint(tone: Tone, bold: bool, text: &str) -> String {
    match (tone.sgr(), bold) {
        (None, false) => text.to_string(),
        (None, true) => format!("\x1b[1m{}\x1b[0m", text),
        (Some(code), false) => format!("\x1b[{}m{}\x1b[0m", code, text),
        (Some(code), true) => format!("\x1b[1;{}m{}\x1b[0m", code, text),
    }
}

fn tag(instance: &str) -> String {
    paint(Tone::Muted, false, &format!("[{}]", instance))
}

fn notice(mark: &str, tone: Tone, message: &str) {
    eprintln!("  {} {}", paint(tone, true, mark), message);
}

/// Right-aligned verb, then the message: "   Parsing ci.yml"
pub fn status(action: &str, message: &str) {
    eprintln!("{} {}", paint(Tone::Note, true, &format!("{:>10}", action)), message);
}

pub fn success(message: &str) {
    notice("\u{2713}", Tone::Good, message);
}

pub fn failure(message: &str) {
    notice("\u{2717}", Tone::Bad, message);
}

pub fn warning(message: &str) {
    notice("!", Tone::Caution, message);
}

pub fn info(message: &str) {
    notice("i", Tone::Note, message);
}

pub fn error(message: &str) {
    eprintln!("{} {}", paint(Tone::Bad, true, "error:"), message);
}

pub fn header(message: &str) {
    eprintln!("{}", paint(Tone::Plain, true, &format!("==> {}", message)));
}

/// An untagged line in one colour
pub fn tinted(tone: Tone, message: &str) {
    eprintln!("{}", paint(tone, false, message));
}

/// `[instance] message`
pub fn instance_line(instance: &str, tone: Tone, message: &str) {
    eprintln!("{}", instance_text(instance, tone, message));
}

fn instance_text(instance: &str, tone: Tone, message: &str) -> String {
    format!("{} {}", tag(instance), paint(tone, false, message))
}

pub fn step_header(instance: &str, step_index: usize, step_name: &str) {
    println!(
        "{} {} {}",
        tag(instance),
        paint(Tone::Plain, true, &format!("Step {}", step_index + 1)),
        step_name
    );
}

/// One line a step printed; stderr lines in red
pub fn step_output(instance: &str, line: &str, is_error: bool) {
    let tone = if is_error { Tone::Bad } else { Tone::Plain };
    println!("{}", instance_text(instance, tone, &format!("| {}", line)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paint() {
        assert_eq!(paint(Tone::Plain, false, "x"), "x");
        assert_eq!(paint(Tone::Plain, true, "x"), "\x1b[1mx\x1b[0m");
        assert_eq!(paint(Tone::Bad, false, "x"), "\x1b[31mx\x1b[0m");
        assert_eq!(paint(Tone::Good, true, "x"), "\x1b[1;32mx\x1b[0m");
    }

    #[test]
    fn test_instance_text_is_tagged() {
        let text = instance_text("test (ubuntu-latest, 3.8)", Tone::Plain, "| hello");
        assert_eq!(text, "\x1b[2m[test (ubuntu-latest, 3.8)]\x1b[0m | hello");
    }
}
