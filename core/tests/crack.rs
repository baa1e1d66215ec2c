use std::{io::Cursor, time::Duration};

use hashmill_core::{
    benchmark, formats, self_test, CandidateSource, Cracker, Database, Format, MarkovCtxBuilder,
    MarkovSource, Node, ProbabilityTables, Stop, Tuning, WordlistSource,
};

const SHA512_TEST: &str = "ee26b0dd4af7e749aa1a8ee3c10ae9923f618980772e473f8819a5d4940e0db27ac185f8a0e1d5f84f88bc887fd67b143732c304cc5fa9ad8e6f57f50028a8ff";
const SHA512_TSET: &str = "cec7502182c074bb3d0c07f50d8e284fcb9bd275c530920152bc7a37151849eca85323d911bccc3f6c28b8ce9cc14fc462537bc3b54c64b47a44365c5cff028b";
const SHA512_SETT: &str = "6cc3260906e16a62db59bbab1fa6b0a6997b1f4f9a29d4f6cd8610d1b41c7b96ccda2d34cc273ff9724f81ba3eef09f3ac1616e86b5be2cac5c83f478b630620";

fn init(label: &str) -> Box<dyn Format> {
    let mut format = formats::find(label).unwrap();
    format.init(&Tuning::default().gws(128).lws(32)).unwrap();
    format
}

fn load(format: &dyn Format, lines: &str) -> Database {
    Database::load(format.codec(), Cursor::new(lines)).unwrap()
}

#[test]
fn test_every_format_self_tests_and_benchmarks() {
    for mut format in formats::registry() {
        let label = format.params().label;
        format.init(&Tuning::default().gws(64).lws(16)).unwrap();

        self_test(&mut *format).unwrap_or_else(|err| panic!("{label}: {err}"));
        let bench = benchmark(&mut *format, Duration::from_millis(10)).unwrap();
        assert!(bench.candidates >= 64, "{label}");

        format.done();
        format.done();
    }
}

#[test]
fn test_markov_nodes_crack_everything_once() {
    let tables = ProbabilityTables::train(Cursor::new("test\ntset\nsett\n")).unwrap();
    let hashes = format!("alice:{SHA512_TEST}\nbob:{SHA512_TSET}\ncarol:{SHA512_SETT}\n");

    let mut cracked = 0;
    let mut candidates = 0;
    let mut keyspace = 0;
    for node in 1..=2 {
        let ctx = MarkovCtxBuilder::new()
            .level(Some(60))
            .max_len(Some(4))
            .node(Some(Node::new(node, node, 2).unwrap()))
            .build(tables.clone())
            .unwrap();
        keyspace = ctx.keyspace();

        let format = init("raw-sha512");
        let db = load(&*format, &hashes);
        let summary = Cracker::new(format, db, Box::new(MarkovSource::new(ctx)))
            .run(None)
            .unwrap();
        assert_ne!(Stop::Aborted, summary.stop);
        candidates += summary.candidates;
        cracked += summary.cracked;
    }

    // the nodes share the keyspace without overlapping
    assert_eq!(3, cracked);
    assert!(candidates <= keyspace);
}

#[test]
fn test_wordlist_resume_skips_tried_candidates() {
    let format = init("raw-sha512");
    let db = load(&*format, &format!("{SHA512_TEST}\n{SHA512_SETT}\n"));

    let words = b"test\npassword\nnope\nsett\n".to_vec();
    let mut source = WordlistSource::new(Cursor::new(words), None);
    source.restore_state(&mut "2\n".as_bytes()).unwrap();

    let summary = Cracker::new(format, db, Box::new(source)).run(None).unwrap();

    assert_eq!(Stop::Exhausted, summary.stop);
    assert_eq!(2, summary.candidates);
    assert_eq!(1, summary.cracked);
    assert_eq!(1, summary.remaining);
    assert_eq!("4", summary.state);
}

#[test]
fn test_salted_and_device_formats_crack() {
    let format = init("mscash");
    let db = load(&*format, "M$administrator#25fd08fa89795ed54207e6e8442a6ca0\n");
    let summary = Cracker::new(
        format,
        db,
        Box::new(WordlistSource::new(Cursor::new(b"a\npassword\n".to_vec()), None)),
    )
    .run(None)
    .unwrap();
    assert_eq!(Stop::AllCracked, summary.stop);

    let format = init("raw-sha512-device");
    let db = load(&*format, &format!("$SHA512${SHA512_TSET}\n"));
    let summary = Cracker::new(
        format,
        db,
        Box::new(WordlistSource::new(Cursor::new(b"tset\n".to_vec()), None)),
    )
    .run(None)
    .unwrap();
    assert_eq!(Stop::AllCracked, summary.stop);
}
