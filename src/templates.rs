//! Sample email templates for testing and demonstration.
//!
//! Together they form a small source tree: a base layout, a branded layout
//! extending it, partials, and two compile targets.

use std::fs;
use std::io;
use std::path::Path;

/// Root layout with a head, an embedded stylesheet, and three blocks.
pub fn base_layout() -> &'static str {
    r##"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{% block subject %}{% endblock %}</title>
    <style>
        .muted { color: #6b7280; font-size: 12px; }
        @media (max-width: 600px) { .muted { font-size: 10px; } }
    </style>
</head>
<body>
    {% include "partials/_header.njk" %}
    {% block body %}{% endblock %}
    {% block footer %}<p class="muted">Sent by {{ site_name }}</p>{% endblock %}
</body>
</html>
"##
}

/// Branded layout sitting between the base layout and the emails.
pub fn brand_layout() -> &'static str {
    r##"{% extends "layouts/base.njk" %}
{% block footer %}<p class="muted">{{ site_name }} &middot; {% include "partials/_address.njk" %}</p>{% endblock %}
"##
}

pub fn header_partial() -> &'static str {
    r##"<container class="header"><row><columns padding="16px"><h1>{{ site_name }}</h1></columns></row></container>"##
}

pub fn address_partial() -> &'static str {
    "1 Main St"
}

/// Welcome email using the layout tags, a loop, and a button.
pub fn welcome_email() -> &'static str {
    r##"{% extends "layouts/brand.njk" %}
{% block subject %}Welcome, {{ user.name }}{% endblock %}
{% block body %}
<container class="content">
    <row background="#ffffff">
        <columns padding="24px">
            <p class="lead">Hi {{ user.name | title }},</p>
            {% for item in checklist %}<p>{{ loop.index }}. {{ item }}</p>{% endfor %}
            <button href="{{ confirm_url }}">Confirm your email</button>
        </columns>
    </row>
</container>
{% endblock %}
"##
}

/// Password reset email extending the base layout directly.
pub fn reset_email() -> &'static str {
    r##"{% extends "layouts/base.njk" %}
{% block subject %}Reset your password{% endblock %}
{% block body %}<p>Use this code: <b>{{ code }}</b></p>{% if expires %}<p class="muted">Expires {{ expires }}</p>{% endif %}{% endblock %}
"##
}

/// Stylesheet passed as the external CSS.
pub fn stylesheet() -> &'static str {
    r##"/* shared email styles */
p { margin: 0 0 12px; }
.lead { font-size: 18px; }
a:hover { text-decoration: underline; }
@font-face { font-family: Brand; src: url(brand.woff); }
"##
}

/// Write the sample tree under `root` and return the stylesheet's path
/// relative to it.
pub fn write_sample_tree(root: &Path) -> io::Result<&'static str> {
    let files = [
        ("layouts/base.njk", base_layout()),
        ("layouts/brand.njk", brand_layout()),
        ("partials/_header.njk", header_partial()),
        ("partials/_address.njk", address_partial()),
        ("emails/welcome.njk", welcome_email()),
        ("emails/reset.njk", reset_email()),
        ("email.css", stylesheet()),
    ];
    for (name, body) in files {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, body)?;
    }
    Ok("email.css")
}
