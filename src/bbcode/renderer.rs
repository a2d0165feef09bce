//! The rich-text renderer boundary.
//!
//! Full BBCode rendering belongs to an external renderer; [`Render`] is the
//! seam the postprocess pipeline calls through. [`BbcodeRenderer`] is the
//! minimal implementation shipped here: it escapes text, keeps line breaks,
//! and turns `[img]` tags into `<img>` elements that point at the locally
//! cached copy when one exists.

use agora_db::pool::DbPool;
use agora_db::queries::cached_images;
use tracing::warn;

use super::scanner::IMG_TAG;
use crate::images::{asset_url, ImageSize};

/// Pure function from raw markup to HTML, given the current image cache.
pub trait Render: Send + Sync {
    fn render(&self, raw: &str) -> String;
}

/// Renderer that resolves `[img]` tags against the image cache.
#[derive(Clone)]
pub struct BbcodeRenderer {
    pool: DbPool,
}

impl BbcodeRenderer {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn render_image(&self, url: &str) -> String {
        let cached = self
            .pool
            .get()
            .map_err(|e| e.to_string())
            .and_then(|conn| {
                cached_images::get_by_source_url(&conn, url).map_err(|e| e.to_string())
            });

        match cached {
            Ok(Some(image)) => format!(
                r#"<a href="{}"><img src="{}" alt="" data-source="{}"></a>"#,
                asset_url(image.id, ImageSize::Original),
                asset_url(image.id, ImageSize::Medium),
                escape_html(url)
            ),
            Ok(None) => remote_image(url),
            Err(e) => {
                warn!(url = %url, error = %e, "Image cache lookup failed; rendering remote URL");
                remote_image(url)
            }
        }
    }
}

impl Render for BbcodeRenderer {
    fn render(&self, raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        let mut last = 0;

        for caps in IMG_TAG.captures_iter(raw) {
            let (Some(whole), Some(url)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            push_text(&mut out, &raw[last..whole.start()]);
            let url = url.as_str().trim();
            if url.is_empty() {
                push_text(&mut out, whole.as_str());
            } else {
                out.push_str(&self.render_image(url));
            }
            last = whole.end();
        }
        push_text(&mut out, &raw[last..]);

        out
    }
}

/// `<img>` pointing at the remote source; non-web schemes are shown as text.
fn remote_image(url: &str) -> String {
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        format!(r#"<img src="{}" alt="">"#, escape_html(url))
    } else {
        escape_html(url)
    }
}

fn push_text(out: &mut String, text: &str) {
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push_str("<br>");
        }
        out.push_str(&escape_html(line.trim_end_matches('\r')));
    }
}

fn escape_html(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::CachedImageId;
    use agora_db::models::CachedImage;
    use agora_db::pool::init_memory_pool;
    use chrono::Utc;

    fn cache(pool: &DbPool, url: &str) -> CachedImageId {
        let id = CachedImageId::new();
        let now = Utc::now();
        let conn = pool.get().unwrap();
        cached_images::insert_cached_image(
            &conn,
            &CachedImage {
                id,
                source_url: url.to_string(),
                file_name: "a.png".to_string(),
                path: format!("bbcode/{id}/a.png"),
                content_hash: "0000000000000000".to_string(),
                width: 10,
                height: 10,
                created_at: now,
                updated_at: now,
            },
        )
        .unwrap();
        id
    }

    #[test]
    fn test_escapes_text() {
        let renderer = BbcodeRenderer::new(init_memory_pool().unwrap());
        assert_eq!(
            renderer.render("<script>\"x\" & 'y'</script>"),
            "&lt;script&gt;&quot;x&quot; &amp; &#x27;y&#x27;&lt;/script&gt;"
        );
    }

    #[test]
    fn test_line_breaks() {
        let renderer = BbcodeRenderer::new(init_memory_pool().unwrap());
        assert_eq!(renderer.render("a\r\nb\nc"), "a<br>b<br>c");
    }

    #[test]
    fn test_uncached_image_points_at_remote() {
        let renderer = BbcodeRenderer::new(init_memory_pool().unwrap());
        assert_eq!(
            renderer.render("[img]https://example.com/a.png?x=1&y=2[/img]"),
            r#"<img src="https://example.com/a.png?x=1&amp;y=2" alt="">"#
        );
    }

    #[test]
    fn test_cached_image_points_at_local_asset() {
        let pool = init_memory_pool().unwrap();
        let id = cache(&pool, "https://example.com/a.png");
        let renderer = BbcodeRenderer::new(pool);

        let html = renderer.render("look: [img] https://example.com/a.png [/img]");
        assert!(html.starts_with("look: <a href="));
        assert!(html.contains(&format!("/media/bbcode/{id}/medium")));
        assert!(html.contains(&format!("/media/bbcode/{id}/original")));
    }

    #[test]
    fn test_non_web_scheme_is_text() {
        let renderer = BbcodeRenderer::new(init_memory_pool().unwrap());
        let html = renderer.render("[img]javascript:alert(1)[/img]");
        assert!(!html.contains("<img"));
        assert_eq!(html, "javascript:alert(1)");
    }

    #[test]
    fn test_render_is_deterministic() {
        let pool = init_memory_pool().unwrap();
        cache(&pool, "http://x/a.png");
        let renderer = BbcodeRenderer::new(pool);

        let raw = "[img]http://x/a.png[/img]\n[img]http://x/b.png[/img]";
        assert_eq!(renderer.render(raw), renderer.render(raw));
    }
}
