use pdf_writer::{Content, Name};

use crate::model::{PageContent, FORM_NAME, INVERSION_STATE_NAME};

/// Build the three replacement streams for a `width` x `height` page.
pub fn inverted_page_content(width: f32, height: f32) -> PageContent {
    PageContent {
        background: white_background(width, height),
        form_invocation: form_invocation(),
        overlay: inversion_overlay(width, height),
    }
}

fn white_background(width: f32, height: f32) -> Vec<u8> {
    let mut content = Content::new();
    content
        .save_state()
        .set_fill_rgb(1.0, 1.0, 1.0)
        .rect(0.0, 0.0, width, height)
        .fill_nonzero()
        .restore_state();
    content.finish().to_vec()
}

fn form_invocation() -> Vec<u8> {
    let mut content = Content::new();
    content
        .save_state()
        .x_object(Name(FORM_NAME.as_bytes()))
        .restore_state();
    content.finish().to_vec()
}

// path first, blend state and colour after; all take effect at `f`
fn inversion_overlay(width: f32, height: f32) -> Vec<u8> {
    let mut content = Content::new();
    content
        .save_state()
        .rect(0.0, 0.0, width, height)
        .set_parameters(Name(INVERSION_STATE_NAME.as_bytes()))
        .set_fill_rgb(1.0, 1.0, 1.0)
        .fill_nonzero()
        .restore_state();
    content.finish().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::Object;
    use lopdf::content::Content as Decoded;
    use pretty_assertions::assert_eq;

    fn operators(bytes: &[u8]) -> Vec<String> {
        Decoded::decode(bytes)
            .unwrap()
            .operations
            .into_iter()
            .map(|op| op.operator)
            .collect()
    }

    #[test]
    fn background_fills_page_white() {
        let page = inverted_page_content(612.0, 792.0);
        assert_eq!(operators(&page.background), ["q", "rg", "re", "f", "Q"]);

        let ops = Decoded::decode(&page.background).unwrap().operations;
        let rect: Vec<f32> = ops[2].operands.iter().map(|o| o.as_float().unwrap()).collect();
        assert_eq!(rect, [0.0, 0.0, 612.0, 792.0]);
        let rgb: Vec<f32> = ops[1].operands.iter().map(|o| o.as_float().unwrap()).collect();
        assert_eq!(rgb, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn form_invocation_draws_fm0() {
        let page = inverted_page_content(100.0, 100.0);
        let ops = Decoded::decode(&page.form_invocation).unwrap().operations;
        assert_eq!(operators(&page.form_invocation), ["q", "Do", "Q"]);
        assert_eq!(ops[1].operands, vec![Object::Name(b"Fm0".to_vec())]);
    }

    #[test]
    fn overlay_uses_inversion_state() {
        let page = inverted_page_content(600.0, 800.0);
        assert_eq!(operators(&page.overlay), ["q", "re", "gs", "rg", "f", "Q"]);
        let ops = Decoded::decode(&page.overlay).unwrap().operations;
        assert_eq!(ops[2].operands, vec![Object::Name(b"GSINV".to_vec())]);
        let rect: Vec<f32> = ops[1].operands.iter().map(|o| o.as_float().unwrap()).collect();
        assert_eq!(rect, [0.0, 0.0, 600.0, 800.0]);
    }

    #[test]
    fn streams_are_ascii() {
        let page = inverted_page_content(595.28, 841.89);
        for bytes in [&page.background, &page.form_invocation, &page.overlay] {
            assert!(bytes.is_ascii());
        }
    }
}
