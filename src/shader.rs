use std::collections::HashMap;

/// A generated vertex/fragment program pair and its parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramSource {
    pub vertex: String,
    pub fragment: String,
    pub sensor_count: usize,
    pub uses_distortion: bool,
}

/// Generates the composite program for `sensor_count` overlapping sensors.
///
/// The fragment stage carries one unrolled block per sensor; the distortion
/// branch is compiled in or out, never toggled at runtime. Pure function of
/// its two parameters, see [`ProgramCache`] for memoization.
pub fn generate_program(sensor_count: usize, uses_distortion: bool) -> ProgramSource {
    ProgramSource {
        vertex: generate_vertex(sensor_count),
        fragment: generate_fragment(sensor_count, uses_distortion),
        sensor_count,
        uses_distortion,
    }
}

fn generate_vertex(sensor_count: usize) -> String {
    let define_n = format!("#define N {sensor_count}");
    [
        "#ifdef GL_ES",
        "precision highp float;",
        "#endif",
        define_n.as_str(),
        "uniform mat4 projectionMatrix;",
        "uniform mat4 modelViewMatrix;",
        "uniform mat4 mvpp[N];",
        "attribute vec3 position;",
        "varying vec4 texcoord[N];",
        "void main() {",
        "    vec4 posView = modelViewMatrix * vec4(position, 1.);",
        "    for(int i=0; i<N; ++i) texcoord[i] = mvpp[i] * posView;",
        "    gl_Position = projectionMatrix * posView;",
        "}",
    ]
    .join("\n")
}

fn generate_fragment(sensor_count: usize, uses_distortion: bool) -> String {
    let mut lines: Vec<String> = vec![
        "#ifdef GL_ES".into(),
        "precision highp float;".into(),
        "#endif".into(),
        format!("#define N {sensor_count}"),
        "varying vec4 texcoord[N];".into(),
        "uniform sampler2D texture[N];".into(),
        "uniform vec2 size[N];".into(),
    ];
    if uses_distortion {
        lines.extend(
            [
                "uniform vec2 pps[N];",
                "uniform vec4 distortion[N];",
                "uniform vec3 l1l2[N];",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
    }
    lines.extend(
        [
            "const float borderfadeoutinv = 0.02;",
            "",
            // Distance to the nearest image edge, normalizing p to UV space
            // and flipping the Y texture axis on the way.
            "float getUV(inout vec2 p, vec2 s)",
            "{",
            "    p.y = s.y-p.y;",
            "    vec2 d = min(p.xy, s-p.xy);",
            "    p /= s;",
            "    return min(d.x, d.y);",
            "}",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    if uses_distortion {
        lines.extend(
            [
                "",
                "void distort(inout vec2 p, vec4 adist, vec2 apps)",
                "{",
                "    vec2 v = p - apps;",
                "    float v2 = dot(v, v);",
                "    if(v2 > adist.w) p = vec2(-1.);",
                "    else p += (v2*(adist.x + v2*(adist.y + v2*adist.z)))*v;",
                "}",
                "void distort(inout vec2 p, vec4 dist, vec3 l1l2, vec2 pps)",
                "{",
                "    if((l1l2.x == 0.) && (l1l2.y == 0.)) distort(p, dist, pps);",
                "    else {",
                "        vec2 AB = 1./l1l2.z*(p - pps);",
                "        float R = sqrt(dot(AB, AB));",
                "        float lambda = atan(R)/R;",
                "        vec2 ab = lambda*AB;",
                "        float rho2 = dot(ab, ab);",
                "        if(rho2 > dist.w) { p = vec2(-1.); return; }",
                "        float r357 = (1. + rho2*(dist.x + rho2*(dist.y + rho2*dist.z)))*l1l2.z;",
                "        p = pps + r357*ab + vec2((l1l2.x*ab.x + l1l2.y*ab.y)*l1l2.z, l1l2.y*ab.x*l1l2.z);",
                "    }",
                "}",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
    }
    lines.extend(
        [
            "",
            "void main(void)",
            "{",
            "    vec4 color = vec4(0.);",
            "    vec2 p;",
            "    vec4 c;",
            "    float d;",
            "    int blend = 0;",
        ]
        .iter()
        .map(|s| s.to_string()),
    );

    for i in 0..sensor_count {
        lines.push(format!("    if(texcoord[{i}].z > 0.) {{"));
        lines.push(format!("        p = texcoord[{i}].xy/texcoord[{i}].z;"));
        if uses_distortion {
            lines.push(format!(
                "        distort(p, distortion[{i}], l1l2[{i}], pps[{i}]);"
            ));
        }
        lines.push(format!("        d = borderfadeoutinv * getUV(p, size[{i}]);"));
        lines.push("        if(d > 0.) {".into());
        lines.push(format!("            c = d*texture2D(texture[{i}], p);"));
        lines.push("            color += c;".into());
        lines.push("            if(c.a > 0.) ++blend;".into());
        lines.push("        }".into());
        lines.push("    }".into());
    }

    lines.extend(
        [
            "    if(color.a > 0.0) { color = color / color.a; color.a = 1.; }",
            "    else color = vec4(0.);",
            "    gl_FragColor = color;",
            "}",
        ]
        .iter()
        .map(|s| s.to_string()),
    );

    lines.join("\n")
}

/// Memoizes generated programs per `(sensor_count, uses_distortion)`.
///
/// A rig fixes both parameters once loaded, so a layer only ever holds one
/// entry; the cache exists so repeated lookups hand back the same sources.
#[derive(Default)]
pub struct ProgramCache {
    programs: HashMap<(usize, bool), ProgramSource>,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, sensor_count: usize, uses_distortion: bool) -> &ProgramSource {
        self.programs
            .entry((sensor_count, uses_distortion))
            .or_insert_with(|| generate_program(sensor_count, uses_distortion))
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.programs.len()
    }
}
