use super::*;

#[test]
fn params_split_on_first_equals() {
    let (key, value) = parse_param("room=a=b").unwrap();
    assert_eq!(key, "room");
    assert_eq!(value, Value::String("a=b".into()));

    assert!(matches!(parse_param("room"), Err(CliError::InvalidParam(_))));
    assert!(matches!(parse_param("=x"), Err(CliError::InvalidParam(_))));
}

#[test]
fn avatar_content_types() {
    assert_eq!(content_type_for("me.PNG"), Some("image/png"));
    assert_eq!(content_type_for("me.jpeg"), Some("image/jpeg"));
    assert_eq!(content_type_for("notes.txt"), None);
    assert_eq!(content_type_for("noext"), None);
}

#[test]
fn approvals_carry_response() {
    assert_eq!(
        RelAction::RejectFollow.request(),
        (RelationshipAction::RespondToFollowRequest, Some(RequestResponse::Reject))
    );
    assert_eq!(RelAction::Follow.request(), (RelationshipAction::Follow, None));
}

#[test]
fn cli_parses_message_send() {
    let cli = Cli::try_parse_from([
        "humtum",
        "--id-token",
        "i",
        "--access-token",
        "a",
        "message",
        "send",
        "--description",
        "hi",
        "--target",
        "1",
        "--target",
        "2",
    ])
    .unwrap();
    let Command::Message(MessageCommand { command: MessageSubcommand::Send { targets, payload, .. } }) = cli.command
    else {
        panic!("expected message send");
    };
    assert_eq!(targets, ["1", "2"]);
    assert_eq!(payload, "{}");
}
