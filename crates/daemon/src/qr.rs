//! Terminal QR codes for the startup banner.
//!
//! Two QR rows share one terminal row through Unicode half blocks, which
//! keeps modules roughly square. Light modules are drawn as glyphs so the
//! code scans on the usual dark terminal background.

use qrcode::{Color, EcLevel, QrCode};

const QUIET_ZONE: usize = 2;

/// Render `data` as terminal lines
pub fn render_lines(data: &str) -> Result<Vec<String>, qrcode::types::QrError> {
    let code = QrCode::with_error_correction_level(data.to_uppercase(), EcLevel::L)?;
    let colors = code.to_colors();
    let size = code.width();
    let total = size + QUIET_ZONE * 2;

    let lit = |x: usize, y: usize| -> bool {
        if x < QUIET_ZONE || y < QUIET_ZONE {
            return true;
        }
        let (qx, qy) = (x - QUIET_ZONE, y - QUIET_ZONE);
        if qx >= size || qy >= size {
            return true;
        }
        colors[qy * size + qx] == Color::Light
    };

    let mut lines = Vec::with_capacity(total.div_ceil(2));
    for pair in 0..total.div_ceil(2) {
        let (upper_y, lower_y) = (pair * 2, pair * 2 + 1);
        let line = (0..total)
            .map(|x| {
                let upper = lit(x, upper_y);
                // Odd row counts end on a blank half row
                let lower = lower_y < total && lit(x, lower_y);
                match (upper, lower) {
                    (true, true) => '█',
                    (true, false) => '▀',
                    (false, true) => '▄',
                    (false, false) => ' ',
                }
            })
            .collect();
        lines.push(line);
    }

    Ok(lines)
}
