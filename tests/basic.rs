//! Core behavior: event sequences, chunked feeding, positions, errors,
//! suspend/resume, the buffer-feed interface.

mod common;

use common::{events_of, parse_doc, Recorder};
use pretty_assertions::assert_eq;
use sonar_xml::{Parser, ParsingStatus, Status, XmlError};

#[test]
fn hello_world_events_and_position() {
    let doc = b"<doc>Hello, world</doc>";
    let mut parser = Parser::new();
    let (recorder, result) = parse_doc(&mut parser, doc);
    result.unwrap();
    assert_eq!(
        recorder.events,
        vec!["start(doc)", "chars(Hello, world)", "end(doc)"]
    );
    assert_eq!(parser.current_line_number(), 1);
    assert_eq!(parser.current_column_number(), 23);
}

#[test]
fn utf8_bom_is_swallowed() {
    let doc = b"\xEF\xBB\xBF<e/>";
    let events = events_of(doc);
    assert_eq!(events, vec!["start(e)", "end(e)"]);
}

#[test]
fn latin1_declared_encoding_converts_to_utf8() {
    let doc = b"<?xml version='1.0' encoding='iso-8859-1'?>\n<d>\xE9</d>";
    let events = events_of(doc);
    assert!(events.contains(&"chars(\u{e9})".to_string()));
    // The decoded character is the two UTF-8 bytes C3 A9.
    assert_eq!("\u{e9}".as_bytes(), [0xC3, 0xA9]);
}

#[test]
fn utf16_le_with_bom() {
    let mut doc = vec![0xFF, 0xFE];
    for unit in "<d>hi</d>".encode_utf16() {
        doc.extend_from_slice(&unit.to_le_bytes());
    }
    let events = events_of(&doc);
    assert_eq!(events, vec!["start(d)", "chars(hi)", "end(d)"]);
}

#[test]
fn unclosed_token_at_end() {
    let mut parser = Parser::new();
    let (_, result) = parse_doc(&mut parser, b"<doc></doc><");
    let err = result.unwrap_err();
    assert_eq!(err.code(), XmlError::UnclosedToken);
    // The lone `<` is the twelfth byte.
    assert_eq!(err.byte_index(), 11);
}

#[test]
fn chunked_feed_is_equivalent_byte_by_byte() {
    let doc: &[u8] = b"<?xml version=\"1.0\"?>\
        <!DOCTYPE r [<!ENTITY e \"ent \xC3\xA9 text\">]>\
        <r a=\"v1\" b=\"&#65;&e;\">\
        text &amp; more<!--note--><?go now?>\
        <k><![CDATA[raw ]] data]]></k>\r\nend\
        </r>";
    let whole = events_of(doc);

    let mut parser = Parser::new();
    let mut recorder = Recorder::new();
    for (i, b) in doc.iter().enumerate() {
        let is_final = i == doc.len() - 1;
        parser
            .parse(&mut recorder, &[*b], is_final)
            .unwrap_or_else(|e| panic!("byte {}: {}", i, e));
    }
    assert_eq!(recorder.events, whole);

    // A mid-size chunking for good measure.
    let mut parser = Parser::new();
    let mut recorder = Recorder::new();
    for (i, chunk) in doc.chunks(7).enumerate() {
        let is_final = (i + 1) * 7 >= doc.len();
        parser.parse(&mut recorder, chunk, is_final).unwrap();
    }
    assert_eq!(recorder.events, whole);
}

#[test]
fn newline_normalization() {
    let events = events_of(b"<r>a\r\nb\rc\nd</r>");
    let text: String = events
        .iter()
        .filter_map(|e| {
            e.strip_prefix("chars(")
                .map(|s| s.trim_end_matches(')').to_string())
        })
        .collect();
    assert_eq!(text, "a\nb\nc\nd");
    assert!(!text.contains('\r'));
}

#[test]
fn character_references() {
    // Decoded characters join the surrounding run.
    let events = events_of(b"<r>&#65;&#x42;c</r>");
    assert_eq!(events, vec!["start(r)", "chars(ABc)", "end(r)"]);
}

#[test]
fn bad_character_reference() {
    let mut parser = Parser::new();
    let (_, result) = parse_doc(&mut parser, b"<r>&#x0;</r>");
    assert_eq!(result.unwrap_err().code(), XmlError::BadCharRef);
    // Surrogates are not XML characters either.
    let mut parser = Parser::new();
    let (_, result) = parse_doc(&mut parser, b"<r>&#xD800;</r>");
    assert_eq!(result.unwrap_err().code(), XmlError::BadCharRef);
}

#[test]
fn cdata_sections() {
    let events = events_of(b"<e>pre<![CDATA[a<&]]b]]>post</e>");
    assert_eq!(
        events,
        vec![
            "start(e)",
            "chars(pre)",
            "cdata-start",
            "chars(a<&]]b)",
            "cdata-end",
            "chars(post)",
            "end(e)",
        ]
    );
}

#[test]
fn cdata_close_in_character_data_is_invalid() {
    let mut parser = Parser::new();
    let (_, result) = parse_doc(&mut parser, b"<e>a]]>b</e>");
    assert_eq!(result.unwrap_err().code(), XmlError::InvalidToken);
}

#[test]
fn comments_and_pis() {
    let events = events_of(b"<?style sheet?><!--top--><r><?p d?><!--in--></r>");
    assert_eq!(
        events,
        vec![
            "pi(style sheet)",
            "comment(top)",
            "start(r)",
            "pi(p d)",
            "comment(in)",
            "end(r)",
        ]
    );
}

#[test]
fn tag_mismatch() {
    let mut parser = Parser::new();
    let (_, result) = parse_doc(&mut parser, b"<a><b></a></b>");
    assert_eq!(result.unwrap_err().code(), XmlError::TagMismatch);
}

#[test]
fn junk_after_document_element() {
    let mut parser = Parser::new();
    let (_, result) = parse_doc(&mut parser, b"<a/><b/>");
    assert_eq!(result.unwrap_err().code(), XmlError::JunkAfterDocElement);

    // Whitespace, comments and PIs are fine there.
    let events = events_of(b"<a/> <!--tail--><?p?>\n");
    assert!(events.contains(&"comment(tail)".to_string()));
}

#[test]
fn no_elements_in_empty_input() {
    let mut parser = Parser::new();
    let (_, result) = parse_doc(&mut parser, b"  \n ");
    assert_eq!(result.unwrap_err().code(), XmlError::NoElements);
}

#[test]
fn misplaced_xml_declaration() {
    let mut parser = Parser::new();
    let (_, result) = parse_doc(&mut parser, b"<r><?xml version='1.0'?></r>");
    assert_eq!(result.unwrap_err().code(), XmlError::MisplacedXmlPi);

    let mut parser = Parser::new();
    let (_, result) = parse_doc(&mut parser, b" <?xml version='1.0'?><r/>");
    assert_eq!(result.unwrap_err().code(), XmlError::MisplacedXmlPi);
}

#[test]
fn xml_declaration_reported() {
    let events = events_of(b"<?xml version=\"1.0\" standalone=\"yes\"?><r/>");
    assert_eq!(
        events[0],
        "xml-decl(Some(\"1.0\") None Some(true))"
    );
}

#[test]
fn errors_are_sticky() {
    let mut parser = Parser::new();
    let mut recorder = Recorder::new();
    let err = parser
        .parse(&mut recorder, b"<a><a", true)
        .unwrap_err();
    let again = parser.parse(&mut recorder, b"more", true).unwrap_err();
    assert_eq!(err.code(), again.code());
    assert_eq!(parser.parsing_status(), ParsingStatus::Error);
    assert_eq!(parser.error_code(), err.code());
}

#[test]
fn suspend_and_resume_deliver_identical_events() {
    let doc: &[u8] = b"<r><a>one</a><b>two</b></r>";
    let whole = events_of(doc);

    let mut parser = Parser::new();
    let mut recorder = Recorder::stopping_on("chars(one)");
    let status = parser.parse(&mut recorder, doc, true).unwrap();
    assert_eq!(status, Status::Suspended);
    assert_eq!(parser.parsing_status(), ParsingStatus::Suspended);

    // Feeding while suspended is refused.
    let err = parser.parse(&mut recorder, b"", true).unwrap_err();
    assert_eq!(err.code(), XmlError::Suspended);

    let status = parser.resume(&mut recorder).unwrap();
    assert_eq!(status, Status::Ok);
    assert_eq!(recorder.events, whole);
}

#[test]
fn abort_from_handler() {
    let mut parser = Parser::new();
    let mut recorder = Recorder::stopping_on("chars");
    recorder.abort = true;
    let err = parser
        .parse(&mut recorder, b"<r>text</r>", true)
        .unwrap_err();
    assert_eq!(err.code(), XmlError::Aborted);
}

#[test]
fn resume_without_suspension() {
    let mut parser = Parser::new();
    let mut recorder = Recorder::new();
    let err = parser.resume(&mut recorder).unwrap_err();
    assert_eq!(err.code(), XmlError::NotSuspended);
}

#[test]
fn stop_before_start() {
    let mut parser = Parser::new();
    let err = parser.stop(true).unwrap_err();
    assert_eq!(err.code(), XmlError::NotStarted);
}

#[test]
fn stop_between_chunks() {
    let mut parser = Parser::new();
    let mut recorder = Recorder::new();
    parser.parse(&mut recorder, b"<r>one", false).unwrap();
    parser.stop(true).unwrap();
    // Suspending a suspended parser again is an error.
    assert_eq!(parser.stop(true).unwrap_err().code(), XmlError::Suspended);
    parser.resume(&mut recorder).unwrap();
    parser.parse(&mut recorder, b"</r>", true).unwrap();
    assert_eq!(
        recorder.events,
        vec!["start(r)", "chars(one)", "end(r)"]
    );
}

#[test]
fn buffer_feed_interface() {
    let doc = b"<doc>buffered</doc>";
    let mut parser = Parser::new();
    let mut recorder = Recorder::new();

    // parse_buffer without get_buffer first.
    let err = parser.parse_buffer(&mut recorder, 0, true).unwrap_err();
    assert_eq!(err.code(), XmlError::NoBuffer);

    let half = doc.len() / 2;
    let buf = parser.get_buffer(half).unwrap();
    buf[..half].copy_from_slice(&doc[..half]);
    parser.parse_buffer(&mut recorder, half, false).unwrap();

    let rest = doc.len() - half;
    let buf = parser.get_buffer(64).unwrap();
    assert!(buf.len() >= 64);
    buf[..rest].copy_from_slice(&doc[half..]);
    parser.parse_buffer(&mut recorder, rest, true).unwrap();

    assert_eq!(
        recorder.events,
        vec!["start(doc)", "chars(buffered)", "end(doc)"]
    );
}

#[test]
fn parse_buffer_rejects_overcommit() {
    let mut parser = Parser::new();
    let mut recorder = Recorder::new();
    parser.get_buffer(4).unwrap();
    let err = parser.parse_buffer(&mut recorder, 5, true).unwrap_err();
    assert_eq!(err.code(), XmlError::InvalidArgument);
}

#[test]
fn reset_allows_reuse() {
    let mut parser = Parser::new();
    let (recorder, result) = parse_doc(&mut parser, b"<a/>");
    result.unwrap();
    assert_eq!(recorder.events, vec!["start(a)", "end(a)"]);

    parser.reset(None).unwrap();
    assert_eq!(parser.parsing_status(), ParsingStatus::Initialized);
    let (recorder, result) = parse_doc(&mut parser, b"<b/>");
    result.unwrap();
    assert_eq!(recorder.events, vec!["start(b)", "end(b)"]);
}

#[test]
fn set_encoding_rejected_mid_parse() {
    let mut parser = Parser::new();
    let mut recorder = Recorder::new();
    parser.parse(&mut recorder, b"<r>", false).unwrap();
    let err = parser.set_encoding("UTF-8").unwrap_err();
    assert_eq!(err.code(), XmlError::CantChangeFeatureOnceParsing);
}

#[test]
fn explicit_encoding_beats_declaration() {
    // Declared Latin-1, configured UTF-8: the configured one wins, so the
    // 2-byte UTF-8 sequence decodes as one character.
    let mut parser = Parser::with_encoding("UTF-8").unwrap();
    let doc = b"<?xml version='1.0' encoding='iso-8859-1'?><d>\xC3\xA9</d>";
    let (recorder, result) = parse_doc(&mut parser, doc);
    result.unwrap();
    assert!(recorder.events.contains(&"chars(\u{e9})".to_string()));
}

#[test]
fn unknown_configured_encoding() {
    assert!(Parser::with_encoding("no-such-encoding").is_err());
}

#[test]
fn invalid_utf8_is_rejected() {
    let mut parser = Parser::new();
    // Overlong slash.
    let (_, result) = parse_doc(&mut parser, b"<r>\xC0\xAF</r>");
    assert_eq!(result.unwrap_err().code(), XmlError::InvalidToken);
}

#[test]
fn partial_char_at_final_buffer_edge() {
    let mut parser = Parser::new();
    let (_, result) = parse_doc(&mut parser, b"<r>\xC3");
    assert_eq!(result.unwrap_err().code(), XmlError::PartialChar);
}

#[test]
fn input_context_points_at_current_position() {
    let mut parser = Parser::new();
    let mut recorder = Recorder::new();
    let err = parser
        .parse(&mut recorder, b"<a></b>", true)
        .unwrap_err();
    assert_eq!(err.code(), XmlError::TagMismatch);
    let (buffer, offset) = parser.input_context();
    assert_eq!(&buffer[offset..offset + 4], b"</b>");
}
