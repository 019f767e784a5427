use proptest::prelude::*;
use tubechat_protocol::{
	ChatCommand, IrcLine, decode_tags, encode_tags, escape_tag_value, parse_emote_tag, unescape_tag_value,
};

#[test]
fn full_privmsg_line_decodes_end_to_end() {
	let raw = "@badge-info=subscriber/8;badges=subscriber/6,premium/1;bits=100;color=#1E90FF;\
		display-name=CheerfulOne;emotes=25:9-13;mod=0;subscriber=1;turbo=0;user-id=1234 \
		:cheerfulone!cheerfulone@cheerfulone.tmi.twitch.tv PRIVMSG #somechannel :cheer100 Kappa indeed";

	let line = IrcLine::parse(raw).expect("parse");
	assert_eq!(line.command, ChatCommand::Privmsg);
	assert_eq!(line.channel().expect("channel").as_str(), "somechannel");
	assert_eq!(line.body(), "cheer100 Kappa indeed");
	assert_eq!(line.tag("bits"), Some("100"));
	assert_eq!(line.tag("display-name"), Some("CheerfulOne"));
	assert!(!line.flag("mod"));
	assert!(line.flag("subscriber"));

	let ranges = parse_emote_tag(line.tag("emotes").expect("emotes tag")).expect("ranges");
	assert_eq!(ranges.len(), 1);
	assert_eq!((ranges[0].start, ranges[0].end), (9, 13));
}

#[test]
fn whisper_and_state_commands_classify() {
	let whisper = IrcLine::parse(":a!a@a WHISPER target :psst").expect("whisper");
	assert_eq!(whisper.command, ChatCommand::Whisper);
	assert_eq!(whisper.body(), "psst");
	assert!(whisper.channel().is_none());

	let state = IrcLine::parse("@color=#8A2BE2;mod=1 :tmi.twitch.tv USERSTATE #somechannel").expect("userstate");
	assert_eq!(state.command, ChatCommand::UserState);
	assert_eq!(state.channel().expect("channel").as_str(), "somechannel");

	let global = IrcLine::parse("@color=#8A2BE2 :tmi.twitch.tv GLOBALUSERSTATE").expect("globaluserstate");
	assert_eq!(global.command, ChatCommand::GlobalUserState);
}

#[test]
fn clearchat_carries_target_in_trailing() {
	let line = IrcLine::parse("@ban-duration=600 :tmi.twitch.tv CLEARCHAT #somechannel :baduser").expect("clearchat");
	assert_eq!(line.command, ChatCommand::ClearChat);
	assert_eq!(line.body(), "baduser");
}

#[test]
fn system_message_tag_unescapes_spaces() {
	let line = IrcLine::parse(
		"@msg-id=raid;system-msg=5\\sraiders\\sfrom\\sElsewhere :tmi.twitch.tv USERNOTICE #somechannel",
	)
	.expect("usernotice");
	assert_eq!(line.tag("system-msg"), Some("5 raiders from Elsewhere"));
}

proptest! {
	// decode(encode(tags)) == tags over values exercising all five escapes.
	#[test]
	fn tag_escape_roundtrip(value in "[a-z;\\\\ \r\n]{0,24}") {
		let escaped = escape_tag_value(&value);
		prop_assert!(!escaped.contains(' '));
		prop_assert!(!escaped.contains(';'));
		prop_assert_eq!(unescape_tag_value(&escaped), value);
	}

	#[test]
	fn tag_blob_roundtrip(a in "[a-z ;]{0,12}", b in "[A-Za-z0-9#\\\\]{0,12}") {
		let mut tags = tubechat_protocol::Tags::new();
		tags.insert("first".to_string(), a);
		tags.insert("second".to_string(), b);
		let blob = encode_tags(&tags);
		prop_assert_eq!(decode_tags(&blob).unwrap(), tags);
	}
}
