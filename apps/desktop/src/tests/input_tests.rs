use super::*;

#[test]
fn plain_text_is_a_message() {
    assert_eq!(parse_input("  hello bot \n"), Input::Message("hello bot".into()));
    assert_eq!(parse_input(""), Input::Message(String::new()));
}

#[test]
fn attach_keeps_paths_with_spaces() {
    assert_eq!(
        parse_input("/attach /tmp/my photo.png"),
        Input::Attach("/tmp/my photo.png".into())
    );
    assert!(matches!(parse_input("/attach"), Input::Invalid(_)));
}

#[test]
fn remove_is_one_based() {
    assert_eq!(parse_input("/remove 1"), Input::Remove(0));
    assert!(matches!(parse_input("/remove 0"), Input::Invalid(_)));
    assert!(matches!(parse_input("/remove two"), Input::Invalid(_)));
}

#[test]
fn server_token_is_optional() {
    assert_eq!(
        parse_input("/server https://bot.example.com s3cret"),
        Input::Server {
            url: "https://bot.example.com".into(),
            token: "s3cret".into()
        }
    );
    assert_eq!(
        parse_input("/server http://localhost:8765"),
        Input::Server {
            url: "http://localhost:8765".into(),
            token: String::new()
        }
    );
}

#[test]
fn unknown_commands_are_rejected() {
    assert_eq!(parse_input("/quit"), Input::Quit);
    assert!(matches!(parse_input("/dance"), Input::Invalid(_)));
}
