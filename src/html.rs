use htmlescape::{encode_attribute, encode_minimal};

use crate::models::{CurrentTrack, Page};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn page_link(page: u32, limit: u32, default_limit: u32) -> String {
    if limit == default_limit {
        format!("/?page={}", page)
    } else {
        format!("/?page={}&limit={}", page, limit)
    }
}

fn now_playing_section(out: &mut String, authenticated: bool, current: Option<&CurrentTrack>) {
    out.push_str("<section id=\"now-playing\">\n<h2>Now playing</h2>\n");
    match (authenticated, current) {
        (false, _) => out.push_str("<p><a href=\"/login\">Log in with Spotify</a></p>\n"),
        (true, None) => out.push_str("<p>Nothing is playing right now.</p>\n"),
        (true, Some(track)) => {
            if let Some(cover) = &track.album_cover {
                out.push_str(&format!(
                    "<img src=\"{}\" alt=\"album cover\" width=\"160\" height=\"160\">\n",
                    encode_attribute(cover)
                ));
            }
            out.push_str(&format!(
                "<p><strong>{}</strong><br>{}</p>\n",
                encode_minimal(&track.name),
                encode_minimal(&track.artist)
            ));
        }
    }
    out.push_str("</section>\n");
}

fn history_section(out: &mut String, page: &Page, limit: u32, default_limit: u32) {
    out.push_str("<section id=\"history\">\n<h2>History</h2>\n");
    if page.tracks.is_empty() {
        out.push_str("<p>No plays recorded on this page.</p>\n");
    } else {
        out.push_str("<table>\n<tr><th>Track</th><th>Artist</th><th>Played at (UTC)</th></tr>\n");
        for track in &page.tracks {
            out.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                encode_minimal(&track.name),
                encode_minimal(&track.artist),
                track.recorded_at.format(TIMESTAMP_FORMAT)
            ));
        }
        out.push_str("</table>\n");
    }

    out.push_str("<nav>");
    if page.page > 1 {
        out.push_str(&format!(
            "<a href=\"{}\">&laquo; newer</a> ",
            page_link(page.page - 1, limit, default_limit)
        ));
    }
    out.push_str(&format!("page {} of {}", page.page, page.total_pages.max(1)));
    if page.page < page.total_pages {
        out.push_str(&format!(
            " <a href=\"{}\">older &raquo;</a>",
            page_link(page.page + 1, limit, default_limit)
        ));
    }
    out.push_str("</nav>\n</section>\n");
}

/// The index page: live track on top, one page of history below
pub fn index(
    authenticated: bool,
    current: Option<&CurrentTrack>,
    page: &Page,
    limit: u32,
    default_limit: u32,
) -> String {
    let mut out = String::from(
        "<!doctype html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>spot history</title>\n</head>\n<body>\n",
    );
    now_playing_section(&mut out, authenticated, current);
    history_section(&mut out, page, limit, default_limit);
    out.push_str("</body>\n</html>\n");
    out
}
