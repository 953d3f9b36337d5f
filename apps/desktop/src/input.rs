/// One line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Message(String),
    Attach(String),
    Remove(usize),
    Attachments,
    Server { url: String, token: String },
    Clear,
    Help,
    Quit,
    Invalid(String),
}

pub const HELP: &str = "\
commands:
  /attach <path>        upload a file for the next message
  /remove <n>           drop staged attachment n (1-based)
  /files                list staged attachments
  /server <url> [token] connect to another server
  /clear                delete the chat history
  /quit                 exit
anything else is sent as a message";

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line.to_string());
    };
    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(name, rest)| (name, rest.trim()))
        .unwrap_or((command, ""));

    match name {
        "attach" if !rest.is_empty() => Input::Attach(rest.to_string()),
        "attach" => Input::Invalid("usage: /attach <path>".into()),
        "remove" => match rest.parse::<usize>() {
            Ok(n) if n > 0 => Input::Remove(n - 1),
            _ => Input::Invalid("usage: /remove <n>".into()),
        },
        "files" => Input::Attachments,
        "server" => {
            let mut parts = rest.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(url), token) => Input::Server {
                    url: url.to_string(),
                    token: token.unwrap_or_default().to_string(),
                },
                (None, _) => Input::Invalid("usage: /server <url> [token]".into()),
            }
        }
        "clear" => Input::Clear,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => Input::Invalid(format!("unknown command '/{other}'; try /help")),
    }
}

#[cfg(test)]
#[path = "tests/input_tests.rs"]
mod tests;
