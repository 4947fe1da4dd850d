use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Pipes `xml` into `7z a -si <path>`, producing a single-member 7z archive
/// the same way the production 7z writer does, so `DumpParser` can read it
/// back unmodified.
fn write_7z_member(path: &Path, xml: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut child = Command::new("7z")
        .arg("a")
        .arg("-si")
        .arg(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn 7z a -si (is 7z on PATH?)");
    child.stdin.take().unwrap().write_all(xml.as_bytes()).unwrap();
    let status = child.wait().unwrap();
    assert!(status.success(), "7z a -si exited with {status:?}");
}

/// One dump shard, `wikidatawiki-20121031-pages-meta-history1.xml-p1p2.7z`,
/// holding two pages (Q1, Q2) with two and one revisions respectively, dated
/// right after Wikidata's inception so a global-stream build only has to
/// walk one month of days instead of every month since inception.
/// Q1's second revision is non-minor with a comment; Q2's only revision
/// carries a redirect. Mirrors the corpus-wide "one valid, small month" test
/// fixture idiom but for a single dump shard instead of a zstd month file.
pub fn make_dump_shard_basic() -> PathBuf {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.into_path();

    let xml = r#"<mediawiki>
<siteinfo>
<sitename>Wikidata</sitename>
<dbname>wikidatawiki</dbname>
<base>https://www.wikidata.org/wiki/Wikidata:Main_Page</base>
<generator>MediaWiki 1.37.0-wmf.1</generator>
<case>first-letter</case>
<namespaces>
<namespace key="0"></namespace>
<namespace key="120">Property</namespace>
</namespaces>
</siteinfo>
<page>
<title>Q1</title>
<ns>0</ns>
<id>1</id>
<revision>
<id>100</id>
<timestamp>2012-10-30T00:00:00Z</timestamp>
<contributor>
<username>alice</username>
<id>11</id>
</contributor>
<model>wikibase-item</model>
<format>application/json</format>
<text bytes="9">{"foo":1}</text>
<sha1>aaa</sha1>
</revision>
<revision>
<id>101</id>
<parentid>100</parentid>
<timestamp>2012-10-30T12:00:00Z</timestamp>
<contributor>
<username>bob</username>
<id>12</id>
</contributor>
<comment>fixed typo</comment>
<model>wikibase-item</model>
<format>application/json</format>
<text bytes="9">{"foo":2}</text>
<sha1>bbb</sha1>
</revision>
</page>
<page>
<title>Q2</title>
<ns>0</ns>
<id>2</id>
<redirect title="Q1" />
<revision>
<id>200</id>
<timestamp>2012-10-31T00:00:00Z</timestamp>
<contributor>
<username>alice</username>
<id>11</id>
</contributor>
<minor />
<model>wikibase-item</model>
<format>application/json</format>
<text bytes="2">{}</text>
<sha1>ccc</sha1>
</revision>
</page>
</mediawiki>
"#;

    let shard = base.join("wikidatawiki-20121031-pages-meta-history1.xml-p1p2.7z");
    write_7z_member(&shard, xml);
    base
}
