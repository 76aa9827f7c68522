//! Synthetic player scripts shared by the platform tests

/// Standard shapes: helper object with all four operations, decipher, and a
/// guarded n-transform.
///
/// `Vz("abcdefghij") == "egfhdcba"`, `Qn("abc") == "cbax"`.
pub const STANDARD_PLAYER: &str = r#"var Ab=1;
var Xy={ab:function(a){a.reverse()},
cd:function(a,b){a.splice(0,b)},
ef:function(a,b){var c=a[0];a[0]=a[b%a.length];a[b%a.length]=c},
gh:function(a,b){return a.slice(b)}};
Vz=function(a){a=a.split("");Xy.ab(a,7);Xy.cd(a,2);Xy.ef(a,3);return a.join("")};
Qn=function(a){var b=a.split(""),c=[function(d){d.reverse()},function(d,e){d.push(e)},b];c[0](c[2]);if(typeof Zq==="undefined")return a;try{c[1](b,"x")}catch(f){return"enhanced_except_"+a}return b.join("")};
"#;

/// Reverse followed by slice(2); `Rw("abcdef") == "dcba"`.
pub const SLICE_PLAYER: &str = r#"var Hq={$r:function(a){return a.reverse()},
s1:function(a,b){return a.slice(b)}};
Rw=function(a){a=a.split("");Hq.$r(a,1);a=Hq.s1(a,2);return a.join("")};
"#;

/// TCE shapes reading split/join arguments from the global `Kq` table.
///
/// `Tz("abcdef") == "edcba"`, `Pn("abc") == "cba"`.
pub const TCE_PLAYER: &str = r#"var Kq=";;reverse;_w8_".split(";"),Pm=1;
var Xy={ab:function(a){a.reverse()},
cd:function(a,b){a.splice(0,b)}};
Tz=function(a){a=a.split(Kq[0]);Xy.ab(a,3);Xy.cd(a,1);return a.join(Kq[1])};
Pn=function(a){var b=a.split(a.slice(0,0)),c=[Kq[2],b];try{b[Kq[2]]()}catch(d){return Kq[3]+a}return b.join("")};
"#;

/// Neither routine present
pub const UNPARSABLE_PLAYER: &str = "var a=1;function foo(b){return b+1}";

/// Named decipher declaration and an n-transform using the `call` forms of
/// split and join.
///
/// `Vz("abcdef") == "dcba"`, `Qn("abc") == "cbay"`.
pub const NAMED_PLAYER: &str = r#"var Xy={ab:function(a){a.reverse()},
cd:function(a,b){a.splice(0,b)}};
function Vz(a){a=a.split("");Xy.ab(a,1);Xy.cd(a,2);return a.join("")};
Qn=function(a){var b=String.prototype.split.call(a,""),c=[function(d){d.reverse()},b];c[0](c[1]);try{c[1].push("y")}catch(e){return"enhanced_except_"+a}return Array.prototype.join.call(b,"")};
"#;
