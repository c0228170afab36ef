//! Server-rendered pages. Presentation only: every page reads through the
//! same stores and endpoints the API exposes.

use crate::listings::Listing;

/// Fixed bounding box the search-page marker overlay projects into.
/// Centered on the downtown area most seed listings fall in.
#[derive(Debug, Clone, Copy)]
pub struct MapBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

pub const DEFAULT_BOUNDS: MapBounds = MapBounds {
    min_lat: 47.88,
    max_lat: 47.95,
    min_lon: 106.85,
    max_lon: 107.0,
};

/// Linearly scale a coordinate pair into pixel offsets within a
/// `width` x `height` box, clamped to the box edges. Latitude grows
/// upward, so the vertical axis is flipped.
pub fn project_marker(
    latitude: f64,
    longitude: f64,
    bounds: &MapBounds,
    width: f64,
    height: f64,
) -> (f64, f64) {
    let span_lon = bounds.max_lon - bounds.min_lon;
    let span_lat = bounds.max_lat - bounds.min_lat;

    let x = ((longitude - bounds.min_lon) / span_lon * width).clamp(0.0, width);
    let y = ((bounds.max_lat - latitude) / span_lat * height).clamp(0.0, height);

    (x, y)
}

pub fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title} - Yellowbook</title>
<style>
body {{ font-family: sans-serif; margin: 0; background: #fffaf2; color: #333; }}
header {{ background: #f59e0b; padding: 1rem 2rem; }}
header a {{ color: #fff; text-decoration: none; margin-right: 1rem; font-weight: bold; }}
main {{ padding: 2rem; max-width: 960px; margin: 0 auto; }}
.card {{ background: #fff; border: 1px solid #f1d8b4; border-radius: 8px; padding: 1rem; margin-bottom: 1rem; }}
.grid {{ display: grid; grid-template-columns: repeat(auto-fill, minmax(260px, 1fr)); gap: 1rem; }}
.category {{ color: #b45309; font-size: 0.85rem; text-transform: uppercase; }}
.map {{ position: relative; background: #fef3c7; border: 1px solid #f1d8b4; height: 360px; }}
.marker {{ position: absolute; transform: translate(-50%, -100%); }}
</style>
</head>
<body>
<header>
<a href="/">Yellowbook</a>
<a href="/search">Search</a>
<a href="/assistant">AI Assistant</a>
<a href="/admin">Admin</a>
<a href="/signin">Sign in</a>
</header>
<main>
{body}
</main>
</body>
</html>"#
    )
}

fn listing_card(listing: &Listing) -> String {
    let rating = listing
        .rating
        .map(|r| format!("<div>Rating: {r:.1} / 5</div>"))
        .unwrap_or_default();
    format!(
        r#"<div class="card">
<div class="category">{category}</div>
<h3><a href="/listings/{id}">{name}</a></h3>
<div>{address}</div>
<div>{phone}</div>
{rating}
</div>"#,
        category = listing.category,
        id = listing.id,
        name = escape_html(&listing.name),
        address = escape_html(&listing.address),
        phone = escape_html(&listing.phone),
    )
}

pub fn home(listings: &[Listing]) -> String {
    let cards: String = listings.iter().map(listing_card).collect();
    let body = format!(
        "<h1>Business Directory</h1>\n<p>{} listings</p>\n<div class=\"grid\">{cards}</div>",
        listings.len()
    );
    layout("Home", &body)
}

pub fn listing_detail(listing: &Listing) -> String {
    let mut details = String::new();
    if let Some(description) = listing.description.as_deref() {
        details.push_str(&format!("<p>{}</p>\n", escape_html(description)));
    }
    if let Some(website) = listing.website.as_deref() {
        let website = escape_html(website);
        details.push_str(&format!(
            "<div>Website: <a href=\"{website}\" rel=\"noopener\">{website}</a></div>\n"
        ));
    }
    if let Some(email) = listing.email.as_deref() {
        details.push_str(&format!("<div>Email: {}</div>\n", escape_html(email)));
    }
    if let Some(employees) = listing.employees.as_deref() {
        details.push_str(&format!("<div>Employees: {}</div>\n", escape_html(employees)));
    }
    if let Some(founded) = listing.founded {
        details.push_str(&format!("<div>Founded: {founded}</div>\n"));
    }

    // external map view centered on the listing
    let bbox = format!(
        "{:.4}%2C{:.4}%2C{:.4}%2C{:.4}",
        listing.longitude - 0.01,
        listing.latitude - 0.005,
        listing.longitude + 0.01,
        listing.latitude + 0.005,
    );
    let map = format!(
        r#"<iframe width="100%" height="320" frameborder="0"
 src="https://www.openstreetmap.org/export/embed.html?bbox={bbox}&amp;marker={lat}%2C{lon}"></iframe>"#,
        lat = listing.latitude,
        lon = listing.longitude,
    );

    let body = format!(
        r#"<div class="category">{category}</div>
<h1>{name}</h1>
<div>{address}</div>
<div>{phone}</div>
{details}
{map}"#,
        category = listing.category,
        name = escape_html(&listing.name),
        address = escape_html(&listing.address),
        phone = escape_html(&listing.phone),
    );
    layout(&listing.name, &body)
}

pub fn search(query: &str, results: &[Listing]) -> String {
    const MAP_WIDTH: f64 = 920.0;
    const MAP_HEIGHT: f64 = 360.0;

    let cards: String = results.iter().map(listing_card).collect();

    let markers: String = results
        .iter()
        .map(|listing| {
            let (x, y) = project_marker(
                listing.latitude,
                listing.longitude,
                &DEFAULT_BOUNDS,
                MAP_WIDTH,
                MAP_HEIGHT,
            );
            format!(
                r#"<div class="marker" style="left:{x:.0}px;top:{y:.0}px" title="{name}">&#128205;</div>"#,
                name = escape_html(&listing.name),
            )
        })
        .collect();

    let results_section = if query.is_empty() {
        String::new()
    } else {
        format!(
            r#"<p>{count} result(s) for "{query}"</p>
<div class="map">{markers}</div>
<div class="grid">{cards}</div>"#,
            count = results.len(),
            query = escape_html(query),
        )
    };

    let body = format!(
        r#"<h1>Search</h1>
<form method="get" action="/search">
<input type="text" name="q" value="{query}" placeholder="Search businesses...">
<button type="submit">Search</button>
</form>
{results_section}"#,
        query = escape_html(query),
    );
    layout("Search", &body)
}

pub fn assistant() -> String {
    let body = r#"<h1>AI Assistant</h1>
<form id="ask">
<input type="text" id="query" placeholder="Ask about a business..." size="60">
<button type="submit">Ask</button>
</form>
<div id="out"></div>
<script>
document.getElementById('ask').addEventListener('submit', async (e) => {
  e.preventDefault();
  const query = document.getElementById('query').value.trim();
  if (!query) return;
  const out = document.getElementById('out');
  out.textContent = 'Searching...';
  try {
    const res = await fetch('/api/ai/yellow-books/search', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify({query}),
    });
    const data = await res.json();
    if (!res.ok) throw new Error(data.error || res.status);
    let html = '';
    if (data.demoMode) html += '<div class="card">Demo mode: semantic search is not configured.</div>';
    html += '<div class="card"><strong>' + data.answer + '</strong></div>';
    for (const r of data.results) {
      html += '<div class="card"><div class="category">' + r.category + '</div>'
        + '<h3>' + r.name + '</h3><div>' + r.address + '</div>'
        + '<div>score: ' + r.score.toFixed(2) + '</div></div>';
    }
    html += '<div>cached: ' + data.cached + '</div>';
    out.innerHTML = html;
  } catch (err) {
    out.textContent = 'Search failed: ' + err.message;
  }
});
</script>"#;
    layout("AI Assistant", body)
}

pub fn admin_dashboard() -> String {
    let body = r#"<h1>Admin Dashboard</h1>
<div id="stats" class="grid"></div>
<h2>Users</h2>
<div id="users"></div>
<h2>Listings</h2>
<div id="listings"></div>
<script>
const token = localStorage.getItem('yb_token');
async function load() {
  const headers = token ? {Authorization: 'Bearer ' + token} : {};
  const usersRes = await fetch('/admin/users', {headers});
  if (usersRes.status === 401 || usersRes.status === 403) {
    document.getElementById('stats').innerHTML =
      '<div class="card">Admin access required. <a href="/signin">Sign in</a>.</div>';
    return;
  }
  const users = await usersRes.json();
  const listings = await (await fetch('/yellow-books')).json();
  const admins = users.filter(u => u.role === 'admin').length;
  document.getElementById('stats').innerHTML =
    '<div class="card"><h3>' + users.length + '</h3>Users</div>' +
    '<div class="card"><h3>' + listings.length + '</h3>Listings</div>' +
    '<div class="card"><h3>' + admins + '</h3>Admins</div>';
  document.getElementById('users').innerHTML = users.map(u =>
    '<div class="card">' + u.email + ' (' + u.role + ')</div>').join('');
  document.getElementById('listings').innerHTML = listings.map(l =>
    '<div class="card">' + l.name + ' - ' + l.category + '</div>').join('');
}
load();
</script>"#;
    layout("Admin", body)
}

pub fn sign_in() -> String {
    let body = r#"<h1>Sign in</h1>
<p>Sign-in is delegated to the configured identity provider; this form
submits the provider's profile payload to the token exchange.</p>
<form id="signin">
<input type="email" id="email" placeholder="you@example.com" required>
<input type="text" id="name" placeholder="Display name (optional)">
<button type="submit">Sign in</button>
</form>
<div id="out"></div>
<script>
document.getElementById('signin').addEventListener('submit', async (e) => {
  e.preventDefault();
  const res = await fetch('/auth/signin', {
    method: 'POST',
    headers: {'Content-Type': 'application/json'},
    body: JSON.stringify({
      email: document.getElementById('email').value,
      name: document.getElementById('name').value || null,
    }),
  });
  const data = await res.json();
  if (res.ok) {
    localStorage.setItem('yb_token', data.token);
    document.getElementById('out').textContent = 'Signed in as ' + data.user.email;
  } else {
    document.getElementById('out').textContent = 'Sign-in failed: ' + (data.error || res.status);
  }
});
</script>"#;
    layout("Sign in", body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<b>"Tom & Jerry's"</b>"#),
            "&lt;b&gt;&quot;Tom &amp; Jerry&#39;s&quot;&lt;/b&gt;"
        );
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn test_project_marker_corners() {
        let bounds = MapBounds {
            min_lat: 0.0,
            max_lat: 10.0,
            min_lon: 0.0,
            max_lon: 20.0,
        };

        // south-west corner lands bottom-left
        assert_eq!(project_marker(0.0, 0.0, &bounds, 100.0, 50.0), (0.0, 50.0));
        // north-east corner lands top-right
        assert_eq!(project_marker(10.0, 20.0, &bounds, 100.0, 50.0), (100.0, 0.0));
        // center lands in the middle
        assert_eq!(project_marker(5.0, 10.0, &bounds, 100.0, 50.0), (50.0, 25.0));
    }

    #[test]
    fn test_project_marker_clamps_outside_bounds() {
        let bounds = MapBounds {
            min_lat: 0.0,
            max_lat: 10.0,
            min_lon: 0.0,
            max_lon: 10.0,
        };

        let (x, y) = project_marker(-5.0, 50.0, &bounds, 100.0, 100.0);
        assert_eq!((x, y), (100.0, 100.0));
    }
}
