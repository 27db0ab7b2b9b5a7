use criterion::{self, criterion_group, criterion_main, Criterion};
use sonar_xml::{Attributes, Flow, Handler, Parser, SinkHandler};

static LOREM_IPSUM_TEXT: &str =
    "Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed do eiusmod tempor incididunt \
     ut labore et dolore magna aliqua. Hac habitasse platea dictumst vestibulum rhoncus est \
     pellentesque. Risus ultricies tristique nulla aliquet enim tortor at. Fermentum odio eu \
     feugiat pretium nibh ipsum. Volutpat sed cras ornare arcu dui.";

/// A nested document with attributes, text and the odd comment.
fn sample_document() -> Vec<u8> {
    let mut doc = String::from("<?xml version=\"1.0\"?><feed>");
    for i in 0..200 {
        doc.push_str(&format!(
            "<item id=\"{}\" kind=\"entry\"><title>Item {}</title><!-- note -->\
             <body>{}</body><link href=\"https://example.org/{}\"/></item>",
            i, i, LOREM_IPSUM_TEXT, i
        ));
    }
    doc.push_str("</feed>");
    doc.into_bytes()
}

struct CountingHandler {
    starts: usize,
    chars: usize,
}

impl Handler for CountingHandler {
    fn start_element(&mut self, _name: &str, _attributes: &Attributes) -> Flow {
        self.starts += 1;
        Flow::Continue
    }
    fn character_data(&mut self, data: &str) -> Flow {
        self.chars += data.len();
        Flow::Continue
    }
}

fn parse_document(c: &mut Criterion) {
    let doc = sample_document();
    let mut group = c.benchmark_group("parse_document");

    group.bench_function("single chunk", |b| {
        b.iter(|| {
            let mut parser = Parser::new();
            let mut handler = CountingHandler { starts: 0, chars: 0 };
            parser.parse(&mut handler, &doc, true).unwrap();
            assert_eq!(criterion::black_box(handler.starts), 801);
        })
    });

    group.bench_function("4k chunks", |b| {
        b.iter(|| {
            let mut parser = Parser::new();
            let mut handler = CountingHandler { starts: 0, chars: 0 };
            let mut chunks = doc.chunks(4096).peekable();
            while let Some(chunk) = chunks.next() {
                let is_final = chunks.peek().is_none();
                parser.parse(&mut handler, chunk, is_final).unwrap();
            }
            assert_eq!(criterion::black_box(handler.starts), 801);
        })
    });

    group.bench_function("well-formedness only", |b| {
        b.iter(|| {
            let mut parser = Parser::new();
            parser
                .parse(&mut criterion::black_box(SinkHandler), &doc, true)
                .unwrap();
        })
    });

    group.finish();
}

fn parse_namespaced(c: &mut Criterion) {
    let mut doc = String::from("<root xmlns=\"urn:base\" xmlns:x=\"urn:x\">");
    for i in 0..500 {
        doc.push_str(&format!("<x:item n=\"{}\"><leaf/></x:item>", i));
    }
    doc.push_str("</root>");
    let doc = doc.into_bytes();

    c.bench_function("parse_namespaced", |b| {
        b.iter(|| {
            let mut parser = Parser::new_ns(' ');
            let mut handler = CountingHandler { starts: 0, chars: 0 };
            parser.parse(&mut handler, &doc, true).unwrap();
            assert_eq!(criterion::black_box(handler.starts), 1001);
        })
    });
}

criterion_group!(benches, parse_document, parse_namespaced);
criterion_main!(benches);
