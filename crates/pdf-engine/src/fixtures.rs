//! In-memory PDF builders for tests.

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

fn media_box(width: f32, height: f32) -> Vec<Object> {
    vec![0.into(), 0.into(), width.into(), height.into()]
}

fn finish(mut doc: Document, pages_id: ObjectId, pages: Dictionary) -> Vec<u8> {
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("in-memory PDF should serialize");
    bytes
}

fn add_page(doc: &mut Document, pages_id: ObjectId, mut page: Dictionary) -> Object {
    let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
    page.set("Type", "Page");
    page.set("Parent", pages_id);
    page.set("Contents", content_id);
    Object::Reference(doc.add_object(page))
}

/// A document with one page per `(width, height)` entry, sizes in points.
pub fn pdf_with_pages(sizes: &[(f32, f32)]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let kids: Vec<Object> = sizes
        .iter()
        .map(|&(width, height)| {
            add_page(&mut doc, pages_id, dictionary! { "MediaBox" => media_box(width, height) })
        })
        .collect();

    let count = kids.len() as i64;
    finish(doc, pages_id, dictionary! { "Type" => "Pages", "Kids" => kids, "Count" => count })
}

pub fn single_page_pdf(width: f32, height: f32) -> Vec<u8> {
    pdf_with_pages(&[(width, height)])
}

/// One page whose `MediaBox` lives on the parent `Pages` node.
pub fn pdf_with_inherited_media_box(width: f32, height: f32) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let kid = add_page(&mut doc, pages_id, Dictionary::new());

    finish(
        doc,
        pages_id,
        dictionary! {
            "Type" => "Pages",
            "Kids" => vec![kid],
            "Count" => 1,
            "MediaBox" => media_box(width, height),
        },
    )
}

pub fn rotated_page_pdf(width: f32, height: f32, rotate: i64) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let kid = add_page(
        &mut doc,
        pages_id,
        dictionary! { "MediaBox" => media_box(width, height), "Rotate" => rotate },
    );

    finish(doc, pages_id, dictionary! { "Type" => "Pages", "Kids" => vec![kid], "Count" => 1 })
}

/// A structurally valid document with an empty page tree.
pub fn empty_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let kids: Vec<Object> = Vec::new();
    finish(doc, pages_id, dictionary! { "Type" => "Pages", "Kids" => kids, "Count" => 0 })
}
