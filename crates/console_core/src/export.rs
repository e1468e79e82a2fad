use anyhow::{Context, Result};
use std::io::{Seek, Write};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::config::GameParameters;
use crate::platform::Platform;

/// Replace the `{GAME_*}` scalar placeholders in the exported page
/// template.
pub fn substitute_placeholders(template: &str, params: &GameParameters) -> String {
    let p = params.v1();
    template
        .replace("{GAME_NAME}", &p.name)
        .replace("{GAME_WIDTH}", &p.resolution.width.to_string())
        .replace("{GAME_HEIGHT}", &p.resolution.height.to_string())
        .replace("{GAME_ZOOM}", &p.zoom.to_string())
        .replace("{GAME_SPRITE_WIDTH}", &p.sprites.width.to_string())
        .replace("{GAME_SPRITE_HEIGHT}", &p.sprites.height.to_string())
        .replace("{GAME_HIDE_MOUSE}", &p.hide_mouse_cursor.to_string())
}

/// Expand one `<!-- TAG -->...<!-- TAG_END -->` repeated block: the inner
/// chunk is emitted once per item with `placeholder` substituted. Unknown
/// tags leave the template untouched.
pub fn expand_block(template: &str, tag: &str, placeholder: &str, items: &[String]) -> String {
    let open = format!("<!-- {tag} -->");
    let close = format!("<!-- {tag}_END -->");
    let Some(start) = template.find(&open) else {
        return template.to_string();
    };
    let Some(end_rel) = template[start..].find(&close) else {
        return template.to_string();
    };
    let end = start + end_rel;
    let inner = &template[start + open.len()..end];
    let mut expanded = String::new();
    for item in items {
        expanded.push_str(&inner.replace(placeholder, item));
    }
    let mut out = String::with_capacity(template.len());
    out.push_str(&template[..start]);
    out.push_str(&expanded);
    out.push_str(&template[end + close.len()..]);
    out
}

/// Full `index.html` generation: scalar placeholders plus the four
/// resource-list blocks.
pub fn render_index(template: &str, params: &GameParameters) -> String {
    let p = params.v1();
    let html = substitute_placeholders(template, params);
    let html = expand_block(&html, "SCRIPTS", "{GAME_SCRIPT}", &p.scripts);
    let html = expand_block(&html, "SPRITESHEETS", "{GAME_SPRITESHEET}", &p.spritesheets);
    let html = expand_block(&html, "LEVELS", "{GAME_LEVEL}", &p.levels);
    expand_block(&html, "SOUNDS", "{GAME_SOUND}", &p.sounds)
}

/// Write the exported game archive: fixed engine runtime files, every
/// declared game resource, the configuration, and the generated
/// `index.html`.
pub fn export_game<W: Write + Seek>(
    out: W,
    platform: &dyn Platform,
    params: &GameParameters,
    index_template: &str,
    runtime_files: &[&str],
) -> Result<()> {
    let mut zip = ZipWriter::new(out);
    let options = SimpleFileOptions::default();

    zip.start_file("index.html", options)?;
    zip.write_all(render_index(index_template, params).as_bytes())?;

    zip.start_file(crate::config::CONFIG_FILENAME, options)?;
    zip.write_all(params.write()?.as_bytes())?;

    for name in runtime_files {
        let bytes = platform
            .create_byte_stream(name)
            .with_context(|| format!("missing engine runtime file '{name}'"))?;
        zip.start_file(name.to_string(), options)?;
        zip.write_all(&bytes)?;
    }

    for decl in params.declared_resources() {
        let bytes = match platform.create_byte_stream(&decl.name) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("export: skipping '{}': {}", decl.name, e);
                continue;
            }
        };
        zip.start_file(decl.name.clone(), options)?;
        zip.write_all(&bytes)?;
    }

    zip.finish()?;
    Ok(())
}
